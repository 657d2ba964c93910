//! Scene save/load — snapshot a scene to JSON and MessagePack, then rebuild it.

use std::time::Duration;

use hearth::prelude::*;
use hearth::snapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Health(i32);

/// Runtime-only cache that never goes into a snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct PathCache(Vec<Vec3>);

#[derive(Default)]
struct Regen {
    ticks: u64,
}

impl System for Regen {
    fn id(&self) -> &str {
        "hearth:editor.base"
    }

    fn cycles(&self) -> ProcessingCycles {
        ProcessingCycles::UPDATE
    }

    fn on_update(&mut self, scene: &mut Scene) -> hearth::Result<()> {
        self.ticks += 1;
        scene
            .components_mut()
            .for_each_mut::<Health>(IterFlags::NONE, |_, health| health.0 = (health.0 + 1).min(100));
        Ok(())
    }

    fn save_state(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({ "ticks": self.ticks }))
    }

    fn load_state(&mut self, state: serde_json::Value) -> hearth::Result<()> {
        self.ticks = state["ticks"].as_u64().ok_or_else(|| EcsError::System {
            system: self.id().to_string(),
            message: format!("saved state has no tick count: {state}"),
        })?;
        Ok(())
    }
}

fn register_components(map: &mut ComponentMap) {
    map.register::<Health>(ComponentDescriptor::serde::<Health>("Health"));
    map.register::<PathCache>(
        ComponentDescriptor::serde::<PathCache>("PathCache").with_flags(ComponentFlags::DO_NOT_SERIALIZE),
    );
}

fn main() -> hearth::Result<()> {
    env_logger::init();

    let mut registry = SystemRegistry::new();
    registry.register_default::<Regen>("hearth:editor.base");

    let mut scene = Scene::new("original");
    register_components(scene.components_mut());
    let hero = scene.create_entity("hero");
    let sword = scene.create_entity("sword");
    let map = scene.components_mut();
    map.set_parent(sword, Some(hero))?;
    map.create_component(hero, Health(90))?;
    map.create_component(hero, PathCache(vec![Vec3::ZERO, Vec3::X]))?;
    scene.add_system(Regen::default())?;
    for _ in 0..3 {
        scene.update(Duration::from_millis(16))?;
    }

    let snap = scene.snapshot()?;
    let json = snapshot::encode(&snap, SnapshotFormat::Json)?;
    let binary = snapshot::encode(&snap, SnapshotFormat::Binary)?;
    println!("{}", String::from_utf8_lossy(&json));
    println!("json: {} bytes, msgpack: {} bytes", json.len(), binary.len());

    let mut copy = Scene::new("copy");
    register_components(copy.components_mut());
    copy.load_snapshot(&snapshot::decode(&binary, SnapshotFormat::Binary)?, &registry)?;

    let map = copy.components();
    println!("hero health: {:?}", map.get_component::<Health>(hero)?);
    println!("hero path cache restored: {}", map.has_component::<PathCache>(hero));
    println!("sword parent: {:?}", map.parent(sword));
    if let Some(regen) = copy.systems().get::<Regen>("hearth:editor.base") {
        println!("regen ticks: {}", regen.ticks);
    }
    for (name, value) in map.inspect(hero)? {
        println!("  {name}: {value}");
    }
    Ok(())
}
