use bytes::Bytes;
use clap::Parser;
use rpc3::{RemoteError, msg::Frame};

/// Decodes a captured rpc3 frame and prints it as JSON.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// File holding exactly one frame.
    pub path: std::path::PathBuf,

    /// Pretty-print the output.
    #[arg(long, default_value_t = false)]
    pub pretty: bool,
}

fn inspect(data: &Bytes) -> rpc3::Result<serde_json::Value> {
    match Frame::parse(data) {
        Ok(frame) => Ok(serde_json::to_value(frame)?),
        Err(frame_err) => match RemoteError::parse(data) {
            Ok(error) => Ok(serde_json::json!({ "remote_error": error })),
            Err(_) => Err(frame_err),
        },
    }
}

fn main() {
    let args = Args::parse();

    let data = match std::fs::read(&args.path) {
        Ok(data) => Bytes::from(data),
        Err(err) => {
            eprintln!("failed to read {}: {err}", args.path.display());
            std::process::exit(1);
        }
    };
    let value = match inspect(&data) {
        Ok(value) => value,
        Err(err) => {
            eprintln!("not an rpc3 frame: {err}");
            std::process::exit(1);
        }
    };
    let text = if args.pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    match text {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("failed to render frame: {err}"),
    }
}
