//! Simple reader example: attach to a map created by `shdict_writer` and
//! watch for updates.

use shared_dict::{CreateMode, JsonSerializer, MapConfig, SharedMap, ShmResult};
use std::time::Duration;

fn main() -> ShmResult<()> {
    shared_dict::init_tracing();
    println!("shared_dict reader example");
    println!("==========================");

    let segment_name = "shdict_example_segment";
    println!("Attaching to map '{segment_name}'...");

    let mut map = SharedMap::new(MapConfig {
        name: Some(segment_name.to_string()),
        create: CreateMode::MustAttach,
        auto_unlink: false,
        ..MapConfig::default()
    })?;
    let codec = JsonSerializer;

    let mut last_len = 0;
    for _ in 0..50 {
        map.apply_update()?;
        let len = map.len()?;
        if len != last_len {
            let greeting: Option<String> = map.get(&codec, &"greeting".to_string())?;
            let counter: Option<i64> = map.get(&codec, &"counter".to_string())?;
            println!("update observed: greeting={greeting:?} counter={counter:?} (len={len})");
            last_len = len;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    Ok(())
}
