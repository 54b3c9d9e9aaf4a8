//! Basic usage example for the ChainPack value codec.

use std::collections::BTreeMap;

use chainpack_wire::{
    pack, unpack, unpack_exact, Array, DateTime, RpcValue, UnpackError, Value, ValueType, TAG_USER,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== ChainPack Codec Example ===\n");

    // 1. Build a structured value
    println!("1. Building a structured value...");
    let mut map = BTreeMap::new();
    map.insert("device".to_string(), RpcValue::from("thermostat-7"));
    map.insert("online".to_string(), RpcValue::from(true));
    map.insert(
        "seen".to_string(),
        RpcValue::from(DateTime::from_epoch_msecs(1_517_529_600_123)),
    );
    map.insert(
        "readings".to_string(),
        RpcValue::from(vec![
            RpcValue::from(21.5f64),
            RpcValue::from(21.7f64),
            RpcValue::from(22.0f64),
        ]),
    );

    let mut value = RpcValue::from(map);
    value.meta_mut().insert(TAG_USER, "trace-1234");
    println!("   Value: {}", value);

    // 2. Pack it
    println!("\n2. Packing...");
    let bytes = pack(&value);
    println!("   Packed size: {} bytes", bytes.len());

    // 3. Unpack it back
    println!("\n3. Unpacking...");
    let decoded = unpack_exact(&bytes)?;
    println!("   Round trip matches: {}", decoded == value);
    if let Some(entries) = decoded.as_map() {
        if let Some(device) = entries.get("device").and_then(RpcValue::as_str) {
            println!("   Device: {}", device);
        }
    }

    // 4. Streaming decode distinguishes truncation from garbage
    println!("\n4. Streaming decode...");
    let mut partial = &bytes[..bytes.len() / 2];
    match unpack(&mut partial) {
        Err(UnpackError::Incomplete) => println!("   Half the bytes: need more input"),
        other => println!("   Unexpected: {:?}", other),
    }

    // 5. Homogeneous arrays skip per-element type bytes
    println!("\n5. Packing a homogeneous array...");
    let mut samples = Array::new(ValueType::Int)?;
    for n in [14i64, -3, 250_000] {
        samples.push(Value::Int(n))?;
    }
    let array_bytes = pack(&RpcValue::from(samples));
    println!("   Array packed size: {} bytes", array_bytes.len());

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
