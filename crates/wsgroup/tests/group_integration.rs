/// Integration tests: group lifecycle against a registry.
///
/// Loopback connections only — no transport.
use std::sync::Arc;

use wsgroup::{
    with_group_id, with_max_conn_cnt, Connection, Group, GroupError, GroupId, GroupRegistry,
    LoopbackConnection, Member, MemberId, MessageKind, UpgradeRequest,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

fn conn(id: &str) -> Member {
    Member::connection(LoopbackConnection::new(id))
}

fn id(s: &str) -> MemberId {
    MemberId::from(s)
}

/// capacity=2: a, b in; c refused; a out; c in.
#[test]
fn capacity_two_scenario() {
    init_tracing();
    let group = Group::new([with_group_id("room"), with_max_conn_cnt(2)]).unwrap();

    group.add_member("a", conn("conn1")).unwrap();
    group.add_member("b", conn("conn2")).unwrap();

    let conn3 = conn("conn3");
    let err = group.add_member("c", conn3.clone()).unwrap_err();
    assert!(matches!(err, GroupError::CapacityExceeded { capacity: 2, .. }));
    assert_eq!(group.member_ids(), vec![id("a"), id("b")]);

    group.remove_member(&id("a")).unwrap();
    group.add_member("c", conn3).unwrap();
    assert_eq!(group.member_ids(), vec![id("b"), id("c")]);
}

#[test]
fn registry_lookup_reaches_live_members() {
    init_tracing();
    let registry = GroupRegistry::new();
    let lobby = Arc::new(Group::new([with_group_id("lobby")]).unwrap());
    registry.register(lobby.clone()).unwrap();

    // Mutations through the original Arc are visible through the registry.
    lobby.add_member("alice", conn("c1")).unwrap();
    let found = registry.get(&GroupId::from("lobby")).unwrap();
    assert!(found.contains(&id("alice")));

    // Second group with the same id is refused, first stays queryable.
    let impostor = Arc::new(Group::new([with_group_id("lobby")]).unwrap());
    assert!(matches!(
        registry.register(impostor),
        Err(GroupError::DuplicateId { .. })
    ));
    assert!(Arc::ptr_eq(&registry.get(&"lobby".into()).unwrap(), &lobby));
}

#[test]
fn nested_groups_form_a_routing_tree() {
    init_tracing();
    let registry = GroupRegistry::new();
    let building = Arc::new(Group::new([with_group_id("building")]).unwrap());
    let floor1 = Arc::new(Group::new([with_group_id("floor-1")]).unwrap());
    let floor2 = Arc::new(Group::new([with_group_id("floor-2")]).unwrap());
    registry.register(building.clone()).unwrap();
    registry.register(floor1.clone()).unwrap();

    floor1.add_member("alice", conn("a")).unwrap();
    floor1.add_member("bob", conn("b")).unwrap();
    floor2.add_member("carol", conn("c")).unwrap();
    building.add_member("f1", Member::SubGroup(floor1.clone())).unwrap();
    building.add_member("f2", Member::SubGroup(floor2.clone())).unwrap();
    building.add_member("lobby-screen", conn("screen")).unwrap();

    let leaves: Vec<(String, String)> = building
        .leaf_connections()
        .into_iter()
        .map(|(path, conn)| {
            let path: Vec<&str> = path.iter().map(|m| m.as_str()).collect();
            (path.join("/"), conn.id().to_owned())
        })
        .collect();
    assert_eq!(
        leaves,
        vec![
            ("f1/alice".to_owned(), "a".to_owned()),
            ("f1/bob".to_owned(), "b".to_owned()),
            ("f2/carol".to_owned(), "c".to_owned()),
            ("lobby-screen".to_owned(), "screen".to_owned()),
        ]
    );

    // Nested group outlives its registry entry while the parent holds it.
    let dropped = registry.deregister(&"floor-1".into()).unwrap();
    drop(dropped);
    let via_parent = building.get_member(&id("f1")).unwrap();
    assert!(via_parent.as_group().unwrap().contains(&id("alice")));

    // Closing the loop is refused.
    let err = floor2
        .add_member("up", Member::SubGroup(building.clone()))
        .unwrap_err();
    assert!(matches!(err, GroupError::NestingCycle { .. }));
}

#[tokio::test]
async fn accept_then_dispatch_then_leave() {
    init_tracing();
    let group = Group::new([with_group_id("chat"), with_max_conn_cnt(4)]).unwrap();

    let conn = group
        .accept(&UpgradeRequest::new("alice").header("origin", "https://example.org"))
        .await
        .unwrap();

    let echoed = group
        .dispatch(&group.hook_context(), &id("alice"), MessageKind::Text, b"hello", |m| {
            let payload = b"hello".to_vec();
            async move {
                let conn = m.as_connection().expect("leaf member").clone();
                Ok((conn.id().to_owned(), payload))
            }
        })
        .await
        .unwrap();
    assert_eq!(echoed.0, "loopback:alice");
    assert_eq!(echoed.1, b"hello");

    let removed = group.remove_member(&id("alice")).unwrap();
    removed.as_connection().unwrap().close().unwrap();
    assert!(conn.is_closed());
    assert!(matches!(
        group.remove_member(&id("alice")),
        Err(GroupError::NotFound { .. })
    ));
}
