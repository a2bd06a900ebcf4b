#![no_main]

use libfuzzer_sys::fuzz_target;
use outpost_live_client::protocol::OutgoingMessage;

fuzz_target!(|data: &[u8]| {
    // Exercise the raw-byte path (includes serde_json's UTF-8 validation).
    let Ok(message) = serde_json::from_slice::<OutgoingMessage>(data) else {
        return;
    };

    // Outgoing frames always carry a `data` object on the wire.
    let value = serde_json::to_value(&message).expect("serialize outgoing message");
    assert!(value.get("data").is_some_and(serde_json::Value::is_object));
});
