#![no_main]

use libfuzzer_sys::fuzz_target;
use outpost_live_client::protocol::{decode_frame, InboundFrame};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Whatever decodes as an event must serialize back to a frame that
    // decodes to the same event.
    if let Ok(InboundFrame::Event(message)) = decode_frame(text) {
        let json = serde_json::to_string(&message).expect("re-serialize decoded event");
        match decode_frame(&json) {
            Ok(InboundFrame::Event(again)) => assert_eq!(again.name, message.name),
            other => panic!("re-decoded event changed shape: {other:?}"),
        }
    }
});
