#![no_main]

use daybook_core::change::RawChange;
use daybook_core::model::habit_log::HabitLog;
use daybook_core::model::note::Note;
use daybook_core::model::task::Task;
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes must never panic the decoder, and anything that decodes
// must survive an encode/decode cycle unchanged.
fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Ok(raw) = RawChange::from_value(value) else {
        return;
    };

    if let Ok(event) = raw.decode::<Task>() {
        let again = RawChange::encode(&event).expect("decoded task re-encodes");
        assert_eq!(again.decode::<Task>().expect("re-decodes"), event);
    }
    let _ = raw.decode::<Note>();
    let _ = raw.decode::<HabitLog>();
});
