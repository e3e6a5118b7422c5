//! Recursive-wrap example: a parent map with two children, unlinked as
//! one cascade.

use shared_dict::{CreateMode, MapConfig, RecursiveMap, ShmResult};

fn main() -> ShmResult<()> {
    shared_dict::init_tracing();
    println!("shared_dict recursive wrap example");
    println!("==================================");

    let mut parent = RecursiveMap::new(MapConfig {
        name: Some("shdict_example_parent".to_string()),
        create: CreateMode::CreateOrAttach,
        ..MapConfig::default()
    })?;

    let mut settings = parent.child("shdict_example_settings")?;
    let mut metrics = parent.child("shdict_example_metrics")?;

    let codec = shared_dict::JsonSerializer;
    settings.core().set(&codec, &"theme".to_string(), &"dark".to_string())?;
    metrics.core().set(&codec, &"requests".to_string(), &0i64)?;

    println!("registered children: {:?}", parent.children()?);

    println!("tearing down the whole tree...");
    parent.unlink_cascade()?;
    println!("done");

    Ok(())
}
