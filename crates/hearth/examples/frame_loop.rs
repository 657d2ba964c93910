//! Frame loop — systems, fixed steps and events driving a tiny simulation.
//!
//! Run with `RUST_LOG=debug cargo run --example frame_loop` to see the
//! scheduler's lifecycle logging.

use std::time::Duration;

use hearth::prelude::*;

#[derive(Debug)]
struct Velocity(Vec3);

struct Landed {
    entity: EntityId,
}

impl Event for Landed {}

/// Integrates velocity under gravity at the fixed rate.
struct Gravity;

impl System for Gravity {
    fn id(&self) -> &str {
        "demo:gravity"
    }

    fn cycles(&self) -> ProcessingCycles {
        ProcessingCycles::FIXED_UPDATE
    }

    fn on_fixed_update(&mut self, scene: &mut Scene) -> hearth::Result<()> {
        let dt = scene.time().fixed_delta_secs();
        let map = scene.components_mut();
        let mut landed = Vec::new();

        let mut iter = map.create_iterator::<Velocity>(IterFlags::ORDERED);
        while iter.next(map) {
            let hit_ground = iter.with_co_component_mut::<Transform, _>(map, |velocity, transform| {
                velocity.0.y -= 9.81 * dt;
                transform.translation += velocity.0 * dt;
                transform.translation.y <= 0.0
            })?;
            if hit_ground {
                landed.extend(iter.entity_id());
            }
        }
        drop(iter);

        for entity in landed {
            scene.components_mut().remove_component::<Velocity>(entity);
            scene.events_mut().invoke(Landed { entity });
        }
        Ok(())
    }
}

/// Reports landings, and keeps drawing while the scene is paused.
struct Reporter;

impl System for Reporter {
    fn id(&self) -> &str {
        "demo:reporter"
    }

    fn cycles(&self) -> ProcessingCycles {
        ProcessingCycles::RENDER
    }

    fn run_when_paused(&self) -> bool {
        true
    }

    fn subscribe_to_events(&mut self, events: &mut EventBus) {
        events.subscribe::<Landed>(self.id(), |event, ctx| {
            let entity = event.entity;
            ctx.defer(FlushTier::EndOfFrame, move |scene| {
                let name = scene.components().get_component::<Name>(entity)?;
                println!("{} landed at frame {}", name.0, scene.time().frame_count());
                Ok(())
            });
        });
    }

    fn on_render(&mut self, scene: &mut Scene) -> hearth::Result<()> {
        let map = scene.components();
        let falling = map.component_count::<Velocity>();
        if scene.time().frame_count() % 10 == 0 {
            println!("frame {:>3}: {falling} falling", scene.time().frame_count());
        }
        Ok(())
    }
}

fn main() -> hearth::Result<()> {
    env_logger::init();

    let config = SceneConfig {
        fixed_timestep_secs: 1.0 / 50.0,
        ..SceneConfig::default()
    };
    let mut scene = Scene::with_config("frame loop", &config);

    for (i, height) in [2.0_f32, 5.0, 8.0].into_iter().enumerate() {
        let ball = scene.create_entity(format!("ball {i}"));
        let map = scene.components_mut();
        *map.get_component_mut::<Transform>(ball)? = Transform::from_xyz(i as f32, height, 0.0);
        map.create_component(ball, Velocity(Vec3::ZERO))?;
    }

    scene.add_system(Gravity)?;
    scene.add_system(Reporter)?;

    for frame in 0..120 {
        // Pause for a while in the middle; only the reporter keeps running.
        scene.set_paused((40..60).contains(&frame));
        scene.update(Duration::from_millis(16))?;
    }
    Ok(())
}
