#![forbid(unsafe_code)]

use rpc3::{BitStream, ParamReader, ParamWriter, Parameter, RefTags, Result};

#[derive(Parameter, Debug, Default, Clone, PartialEq)]
struct Vector3 {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Parameter, Debug, PartialEq)]
struct Waypoint(u16, Vector3);

#[derive(Parameter, Debug, PartialEq)]
struct Ping;

#[derive(Parameter, Debug, PartialEq)]
struct Labeled<T> {
    label: String,
    value: T,
}

#[derive(Parameter, Debug, Default, PartialEq)]
struct Unit {
    #[parameter(skip)]
    handle: u32,
    health: i16,
    #[parameter(skip)]
    selected: bool,
    position: Vector3,
}

fn encode<T: Parameter>(value: &T) -> Result<BitStream> {
    let mut stream = BitStream::new();
    let mut tags = RefTags::new();
    ParamWriter::new(&mut stream, &mut tags).write(value)?;
    tags.assert_consumed();
    Ok(stream)
}

fn decode<T: Parameter>(stream: &mut BitStream) -> Result<T> {
    ParamReader::new(stream).read()
}

#[test]
fn test_named_fields_in_order() {
    let v = Vector3 {
        x: 1.0,
        y: -2.5,
        z: 0.25,
    };
    let mut stream = encode(&v).unwrap();
    assert_eq!(stream.bits_used(), 96);
    assert_eq!(stream.read_u32().unwrap(), 1.0f32.to_bits());
    assert_eq!(stream.read_u32().unwrap(), (-2.5f32).to_bits());

    stream.reset_read_pointer();
    assert_eq!(decode::<Vector3>(&mut stream).unwrap(), v);
}

#[test]
fn test_tuple_and_unit_structs() {
    let wp = Waypoint(
        7,
        Vector3 {
            x: 3.0,
            ..Default::default()
        },
    );
    let mut stream = encode(&wp).unwrap();
    assert_eq!(stream.bits_used(), 16 + 96);
    assert_eq!(decode::<Waypoint>(&mut stream).unwrap(), wp);

    let stream = encode(&Ping).unwrap();
    assert_eq!(stream.bits_used(), 0);
    assert_eq!(decode::<Ping>(&mut BitStream::new()).unwrap(), Ping);
}

#[test]
fn test_generic_struct() {
    let value = Labeled {
        label: "ammo".to_string(),
        value: vec![3u8, 1, 4],
    };
    let mut stream = encode(&value).unwrap();
    assert_eq!(decode::<Labeled<Vec<u8>>>(&mut stream).unwrap(), value);
}

#[test]
fn test_skipped_fields() {
    let unit = Unit {
        handle: 99,
        health: -4,
        selected: true,
        position: Vector3 {
            x: 1.0,
            y: 2.0,
            z: 3.0,
        },
    };
    let mut stream = encode(&unit).unwrap();
    assert_eq!(stream.bits_used(), 16 + 96);

    let fresh = decode::<Unit>(&mut stream).unwrap();
    assert_eq!(fresh.handle, 0);
    assert!(!fresh.selected);
    assert_eq!(fresh.health, -4);
    assert_eq!(fresh.position, unit.position);

    // updating in place keeps the fields that are not on the wire
    let mut local = Unit {
        handle: 5,
        selected: true,
        ..Default::default()
    };
    stream.reset_read_pointer();
    local
        .decode_in_place(&mut ParamReader::new(&mut stream))
        .unwrap();
    assert_eq!(local.handle, 5);
    assert!(local.selected);
    assert_eq!(local.health, -4);
    assert_eq!(local.position, unit.position);
}

#[test]
fn test_truncated_struct() {
    let mut stream = encode(&Vector3::default()).unwrap();
    let mut short = stream.read_stream(64).unwrap();
    assert!(decode::<Vector3>(&mut short).is_err());
}

#[test]
fn test_min_bits_of_derived_structs() {
    assert_eq!(<Vector3 as Parameter>::MIN_BITS, 96);
    assert_eq!(<Waypoint as Parameter>::MIN_BITS, 16 + 96);
    assert_eq!(<Unit as Parameter>::MIN_BITS, 16 + 96);
    assert_eq!(<Ping as Parameter>::MIN_BITS, 0);

    // a count of empty structs cannot stall the decoder
    let mut stream = BitStream::new();
    stream.write_compressed_u32(200_000_000);
    assert!(decode::<Vec<Ping>>(&mut stream).is_err());

    let mut stream = encode(&vec![Ping, Ping]).unwrap();
    assert_eq!(decode::<Vec<Ping>>(&mut stream).unwrap(), vec![Ping, Ping]);
}
