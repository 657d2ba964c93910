//! Scene hierarchy — parenting, world transforms and subtree deletion.

use hearth::prelude::*;

fn print_tree(map: &ComponentMap, id: EntityId, depth: usize) -> hearth::Result<()> {
    let name = &map.get_component::<Name>(id)?.0;
    let world = map.world_translation(id)?;
    let active = if map.is_active_in_hierarchy(id) { "" } else { " (inactive)" };
    println!("{:indent$}{name} [{id}] at {world}{active}", "", indent = depth * 2);
    for child in map.children(id) {
        print_tree(map, child, depth + 1)?;
    }
    Ok(())
}

fn print_scene(map: &ComponentMap) -> hearth::Result<()> {
    for root in map.roots() {
        print_tree(map, root, 0)?;
    }
    println!();
    Ok(())
}

fn main() -> hearth::Result<()> {
    env_logger::init();

    let mut scene = Scene::new("hierarchy");
    let map = scene.components_mut();

    let ship = map.create_entity("ship");
    *map.get_component_mut::<Transform>(ship)? = Transform::from_xyz(10.0, 0.0, 0.0);

    let turret = map.create_entity("turret");
    map.set_parent(turret, Some(ship))?;
    *map.get_component_mut::<Transform>(turret)? = Transform::from_xyz(0.0, 1.0, 0.0);

    let barrel = map.create_entity("barrel");
    map.set_parent(barrel, Some(turret))?;
    *map.get_component_mut::<Transform>(barrel)? = Transform::from_xyz(0.0, 0.0, 2.0);

    let shield = map.create_entity("shield");
    map.set_parent(shield, Some(ship))?;

    print_scene(map)?;

    map.set_active(turret, false)?;
    if let Err(err) = map.set_parent(ship, Some(barrel)) {
        println!("rejected: {err}\n");
    }
    print_scene(map)?;

    // Dropping the ship without recursion leaves its children as roots.
    scene.delete_entity(ship, true, false)?;
    print_scene(scene.components())?;

    scene.delete_entity(turret, false, true)?;
    print_scene(scene.components())?;

    let map = scene.components();
    println!("deleted ids:");
    for deleted in map.entities().deleted_ids() {
        println!("  {} (reclaimable: {})", deleted.id, deleted.reclaimable);
    }
    Ok(())
}
