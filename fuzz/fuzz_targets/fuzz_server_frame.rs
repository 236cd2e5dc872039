#![no_main]

use expedition_sync::protocol::ServerFrame;
use expedition_sync::Update;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = serde_json::from_slice::<ServerFrame>(data) else {
        return;
    };

    // Anything that parses must survive conversion to an update and back.
    let update = Update::from(frame);
    let json = serde_json::to_string(&ServerFrame::from(&update)).unwrap_or_default();
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = expedition_sync::socket::parse_frame(text);
    }
    assert!(serde_json::from_str::<ServerFrame>(&json).is_ok());
});
