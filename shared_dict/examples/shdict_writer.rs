//! Simple writer example: create a map and set a few keys.

use shared_dict::{CreateMode, JsonSerializer, MapConfig, SharedMap, ShmResult};

fn main() -> ShmResult<()> {
    shared_dict::init_tracing();
    println!("shared_dict writer example");
    println!("==========================");

    let segment_name = "shdict_example_segment";
    println!("Creating map '{segment_name}'...");

    let mut map = SharedMap::new(MapConfig {
        name: Some(segment_name.to_string()),
        create: CreateMode::CreateOrAttach,
        ..MapConfig::default()
    })?;
    let codec = JsonSerializer;

    println!("Writing a few keys...");
    map.set(&codec, &"greeting".to_string(), &"hello from the writer".to_string())?;
    map.set(&codec, &"counter".to_string(), &1i64)?;

    let status = map.status()?;
    println!(
        "wrote {} key(s); full_dump_counter = {}",
        status.len, status.full_dump_counter
    );

    println!("press Enter to exit (this unlinks the segment)...");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input).ok();

    Ok(())
}
