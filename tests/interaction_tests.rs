mod helpers;

use helpers::{ScriptedBridge, game_in, quiet_config};
use nightward::interaction::{Interaction, InteractionDenied, PlayerPose, SphereCaster};
use pretty_assertions::assert_eq;
use serde_json::json;
use world::{InteractableId, InteractableState, Vec3};

#[test]
fn only_the_aimed_item_is_collected() {
    let (mut game, recorder) = game_in("asylum_entrance", quiet_config());
    let mut bridge = ScriptedBridge::default();
    bridge.aim("entrance_office_key");

    // both the note and the key are within reach from here
    let eye = Vec3::new(-0.5, 1.8, 1.0);
    game.tick(16, PlayerPose::new(eye, Vec3::FORWARD), &bridge);
    assert_eq!(game.current_target(), Some(&InteractableId::new("entrance_office_key")));
    assert_eq!(game.interaction_prompt(), Some("Press E to pick up"));

    let result = game.try_interact(&mut bridge).unwrap();
    assert_eq!(
        result,
        Interaction::KeyCollected {
            id: InteractableId::new("entrance_office_key"),
            key_id: "office_key".into(),
        }
    );

    assert_eq!(recorder.count("key_collected"), 1);
    assert_eq!(recorder.count("note_read"), 0);
    assert_eq!(game.state().keys_collected, 1);
    assert_eq!(game.state().notes_read, 0);
    assert!(game.inventory().has("office_key"));
    assert!(game.interactable("entrance_office_key").is_none());
    assert_eq!(bridge.disposed, vec![InteractableId::new("entrance_office_key")]);

    let collected = recorder.events().into_iter().find(|e| e.name == "key_collected").unwrap();
    assert_eq!(collected.payload["id"], json!("office_key"));
    assert_eq!(collected.payload["name"], json!("Office Key"));
}

#[test]
fn locked_door_opens_only_with_its_key() {
    let (mut game, recorder) = game_in("asylum_entrance", quiet_config());
    let mut bridge = ScriptedBridge::default();
    let at_door = PlayerPose::looking_at(Vec3::new(0.0, 1.8, 8.0), Vec3::new(0.0, 0.0, 10.0));

    bridge.aim("entrance_office_door");
    game.tick(16, at_door, &bridge);
    let denied = game.try_interact(&mut bridge).unwrap_err();
    assert!(matches!(
        denied,
        InteractionDenied::Locked { ref required_key, .. } if required_key.as_deref() == Some("office_key")
    ));
    assert_eq!(recorder.count("door_unlocked"), 0);
    let denial = recorder.events().into_iter().find(|e| e.name == "interaction_denied").unwrap();
    assert_eq!(denial.payload["reason"], json!("locked"));
    assert_eq!(denial.payload["kind"], json!("door"));

    // fetch the key
    bridge.aim("entrance_office_key");
    game.tick(16, PlayerPose::looking_at(Vec3::new(-2.0, 1.8, 1.0), Vec3::new(-3.0, 1.0, 2.0)), &bridge);
    game.try_interact(&mut bridge).unwrap();

    bridge.aim("entrance_office_door");
    game.tick(16, at_door, &bridge);
    assert!(matches!(
        game.try_interact(&mut bridge).unwrap(),
        Interaction::DoorUnlocked { ref key_id, .. } if key_id == "office_key"
    ));
    assert_eq!(recorder.count("door_unlocked"), 1);
    assert_eq!(recorder.count("door_opened"), 0);

    game.tick(16, at_door, &bridge);
    let opened = game.try_interact(&mut bridge).unwrap();
    assert_eq!(
        opened,
        Interaction::DoorToggled {
            id: InteractableId::new("entrance_office_door"),
            is_open: true,
            target_area: Some("main_corridor".into()),
        }
    );
    assert_eq!(recorder.count("door_unlocked"), 1);
    let door_event = recorder.events().into_iter().find(|e| e.name == "door_opened").unwrap();
    assert_eq!(door_event.payload["target_area"], json!("main_corridor"));
}

#[test]
fn nothing_in_range_is_denied_without_an_event() {
    let (mut game, recorder) = game_in("asylum_entrance", quiet_config());
    let mut bridge = ScriptedBridge::default();
    bridge.aim("entrance_patient_log");

    // the note is far away from the spawn point
    game.tick(16, game.pose(), &bridge);
    assert_eq!(game.current_target(), None);
    recorder.clear();

    assert_eq!(game.try_interact(&mut bridge), Err(InteractionDenied::NothingToInteract));
    assert!(recorder.events().is_empty());
}

#[test]
fn looking_away_drops_the_target() {
    let (mut game, _recorder) = game_in("asylum_entrance", quiet_config());
    let mut bridge = ScriptedBridge::default();
    let pose = PlayerPose::new(Vec3::new(1.0, 1.8, -1.0), Vec3::FORWARD);

    bridge.aim("entrance_patient_log");
    game.tick(16, pose, &bridge);
    assert!(game.current_target().is_some());

    bridge.look_away();
    game.tick(16, pose, &bridge);
    assert_eq!(game.current_target(), None);
    assert_eq!(game.interaction_prompt(), None);
}

#[test]
fn rereading_a_note_does_not_count_again() {
    let (mut game, recorder) = game_in("asylum_entrance", quiet_config());
    let mut bridge = ScriptedBridge::default();
    bridge.aim("entrance_patient_log");
    let pose = PlayerPose::new(Vec3::new(1.0, 1.8, -1.0), Vec3::FORWARD);

    for _ in 0..3 {
        game.tick(16, pose, &bridge);
        game.try_interact(&mut bridge).unwrap();
    }

    assert_eq!(recorder.count("note_read"), 3);
    assert_eq!(game.state().notes_read, 1);
    assert_eq!(recorder.beats(), vec!["backstory_reveal"]);
    let firsts: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|e| e.name == "note_read")
        .map(|e| e.payload["first_read"].clone())
        .collect();
    assert_eq!(firsts, vec![json!(true), json!(false), json!(false)]);
}

#[test]
fn generator_starts_once_and_switch_toggles() {
    let (mut game, recorder) = game_in("restricted_area", quiet_config());
    let mut bridge = ScriptedBridge::default();
    bridge.aim("main_generator");
    let pose = PlayerPose::looking_at(Vec3::new(-3.5, 1.8, 8.0), Vec3::new(-5.0, 0.0, 8.0));

    game.tick(16, pose, &bridge);
    assert_eq!(
        game.try_interact(&mut bridge).unwrap(),
        Interaction::GeneratorStarted {
            id: InteractableId::new("main_generator")
        }
    );
    game.tick(16, pose, &bridge);
    assert!(matches!(
        game.try_interact(&mut bridge),
        Err(InteractionDenied::AlreadyRunning { .. })
    ));
    assert_eq!(recorder.count("generator_started"), 1);
    assert!(matches!(
        game.interactable("main_generator").unwrap().state,
        InteractableState::Generator { is_running: true, .. }
    ));

    game.load_area("main_corridor").unwrap();
    bridge.aim("corridor_lights");
    let pose = PlayerPose::looking_at(Vec3::new(-4.0, 1.8, 5.0), Vec3::new(-4.0, 1.5, 3.0));
    for expected in [true, false] {
        game.tick(16, pose, &bridge);
        assert!(matches!(
            game.try_interact(&mut bridge).unwrap(),
            Interaction::SwitchToggled { is_on, .. } if is_on == expected
        ));
    }
    let controls: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|e| e.name == "switch_toggled")
        .map(|e| e.payload["controls"].clone())
        .collect();
    assert_eq!(controls, vec![json!("lighting"), json!("lighting")]);
}

#[test]
fn sphere_caster_picks_the_nearest_along_the_ray() {
    let (mut game, _recorder) = game_in("asylum_entrance", quiet_config());
    let mut bridge = SphereCaster::from_interactables(&game.interactables());
    let key = game.interactable("entrance_office_key").unwrap();
    let eye = Vec3::new(-1.5, 1.0, 0.5);

    game.tick(16, PlayerPose::looking_at(eye, key.position), &bridge);
    assert_eq!(game.current_target(), Some(&key.id));
    game.try_interact(&mut bridge).unwrap();

    // the picked-up key no longer blocks the ray
    game.tick(16, PlayerPose::looking_at(eye, key.position), &bridge);
    assert_eq!(game.current_target(), None);
}
