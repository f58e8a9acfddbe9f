//! Directory behavior driven by decoded wire frames.

use rally_lobby::{JoinCheck, LobbyDirectory, LobbyError, LobbyRegistry};
use rally_protocol::{
    Codec, JsonCodec, LobbyFrame, LobbyId, Message, ParticipantId, Role,
};

/// Decodes a wire frame and applies it, the way the session facade does.
fn apply(dir: &mut LobbyDirectory, frame: &str) -> Result<(), LobbyError> {
    let message = JsonCodec.decode(frame).expect("frame should decode");
    let Message::Lobby(frame) = message else {
        panic!("not a lobby frame: {message:?}");
    };
    dir.apply(&frame).map(|_| ())
}

#[test]
fn test_create_reply_makes_lobby_current() {
    let mut dir = LobbyDirectory::new(ParticipantId::from("A"));

    apply(
        &mut dir,
        r#"{"type":"lobby","action":"update","lobby":{"id":"L1","name":"Alpha",
            "commanders":["A"],"pawns":[],"maxCommanders":2,"maxPawns":4,
            "status":"waiting","created_at":1700000000.25}}"#,
    )
    .unwrap();

    let current = dir.current().expect("L1 should be current");
    assert_eq!(current.id, LobbyId::from("L1"));
    assert_eq!(current.commanders, [ParticipantId::from("A")]);
    assert_eq!(dir.len(), 1);
}

#[test]
fn test_rejected_join_leaves_pawn_count_unchanged() {
    let mut dir = LobbyDirectory::new(ParticipantId::from("B"));
    apply(
        &mut dir,
        r#"{"type":"lobby","action":"list","lobbies":[{"id":"L1","name":"Alpha",
            "commanders":["A"],"pawns":["P1","P2"],"maxCommanders":2,"maxPawns":2,
            "status":"waiting","created_at":0}]}"#,
    )
    .unwrap();
    assert_eq!(dir.check_join(&LobbyId::from("L1"), Role::Pawn), JoinCheck::RoleFull);

    // The peer answers a full-role join with an error frame, which is not a
    // lobby frame and never reaches the directory.
    let rejection = JsonCodec
        .decode(r#"{"type":"error","message":"no pawn seats left"}"#)
        .unwrap();
    assert!(rejection.payload::<LobbyFrame>().is_none());

    assert_eq!(dir.get(&LobbyId::from("L1")).unwrap().pawns.len(), 2);
    assert_eq!(dir.current_id(), None);
}

#[test]
fn test_each_list_frame_is_the_whole_directory() {
    let mut dir = LobbyDirectory::new(ParticipantId::from("A"));
    let snapshots = [
        r#"{"type":"lobby","action":"list","lobbies":[
            {"id":"L1","name":"a","commanders":["X"],"maxCommanders":1,"maxPawns":1},
            {"id":"L2","name":"b","commanders":["Y"],"maxCommanders":1,"maxPawns":1}]}"#,
        r#"{"type":"lobby","action":"list","lobbies":[]}"#,
        r#"{"type":"lobby","action":"list","lobbies":[
            {"id":"L3","name":"c","commanders":["Z"],"maxCommanders":1,"maxPawns":1}]}"#,
    ];
    let expected: [&[&str]; 3] = [&["L1", "L2"], &[], &["L3"]];

    for (frame, expected) in snapshots.iter().zip(expected) {
        apply(&mut dir, frame).unwrap();
        let ids: Vec<_> = dir.lobbies().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, expected);
    }
}

#[test]
fn test_directory_never_holds_overfull_lobby() {
    let mut dir = LobbyDirectory::new(ParticipantId::from("A"));
    let overfull = r#"{"type":"lobby","action":"update","lobby":{"id":"L1","name":"x",
        "commanders":["X","Y","Z"],"pawns":[],"maxCommanders":2,"maxPawns":4}}"#;

    let result = apply(&mut dir, overfull);

    assert!(matches!(result, Err(LobbyError::ProtocolViolation(_))));
    assert!(dir.is_empty());
    for lobby in dir.lobbies() {
        assert!(lobby.commanders.len() <= lobby.max_commanders);
        assert!(lobby.pawns.len() <= lobby.max_pawns);
    }
}

#[test]
fn test_directory_follows_registry_through_join_and_leave() {
    let host = ParticipantId::from("host");
    let guest = ParticipantId::from("guest");
    let mut registry = LobbyRegistry::new();
    let mut guest_view = LobbyDirectory::new(guest.clone());

    let lobby = registry.create(&host, "Alpha", 1, 2).unwrap().clone();
    guest_view
        .apply(&LobbyFrame::List {
            lobbies: Some(registry.list()),
        })
        .unwrap();
    assert!(guest_view.check_join(&lobby.id, Role::Pawn).is_allowed());
    assert_eq!(
        guest_view.check_join(&lobby.id, Role::Commander),
        JoinCheck::RoleFull
    );

    let joined = registry.join(&guest, &lobby.id, Role::Pawn).unwrap().clone();
    guest_view
        .apply(&LobbyFrame::Update {
            lobby: Some(joined),
            lobby_id: None,
        })
        .unwrap();
    assert_eq!(guest_view.current_id(), Some(&lobby.id));

    registry.leave(&guest, &lobby.id).unwrap();
    guest_view
        .apply(&LobbyFrame::Update {
            lobby: None,
            lobby_id: Some(lobby.id.clone()),
        })
        .unwrap();
    assert_eq!(guest_view.current_id(), None);
    assert_eq!(guest_view.get(&lobby.id), registry.get(&lobby.id));
}
