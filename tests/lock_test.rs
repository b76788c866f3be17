use std::sync::Arc;

use async_trait::async_trait;

use mushcode::ast::{Node, StaticParser};
use mushcode::lock::{self, LockEnv};
use mushcode::world::{
    ConnectionInfo, InMemoryWorld, Located, ObjectKind, ObjectRecord, WorldError, WorldService,
};
use mushcode::{EvalContext, Markup, ObjRef, SharedEval, TreeEvaluator};

struct Fixture {
    world: Arc<InMemoryWorld>,
    parser: Arc<StaticParser>,
    shared: Arc<SharedEval>,
    room: ObjectRecord,
    actor: ObjectRecord,
    door: ObjectRecord,
}

fn fixture() -> Fixture {
    let world = Arc::new(InMemoryWorld::new());
    let parser = Arc::new(StaticParser::new());
    let room = world.create("Hall", ObjectKind::Room, None);
    let actor = world.create("Rhea", ObjectKind::Player, None);
    world.move_to(&actor.reference, Some(room.reference));
    let door = world.create("door", ObjectKind::Exit, Some(actor.reference));
    world.move_to(&door.reference, Some(room.reference));
    let shared = Arc::new(SharedEval::new(world.clone(), parser.clone()));
    Fixture {
        world,
        parser,
        shared,
        room,
        actor,
        door,
    }
}

impl Fixture {
    fn ctx(&self) -> Arc<EvalContext> {
        Arc::new(EvalContext::new(
            self.shared.clone(),
            self.actor.reference,
            self.actor.reference,
        ))
    }

    fn env(&self) -> Arc<LockEnv> {
        Arc::new(LockEnv::new(self.world.clone()))
    }
}

async fn eval_text(fixture: &Fixture, node: &Node) -> Option<String> {
    let evaluator = TreeEvaluator::new();
    evaluator
        .evaluate(node, fixture.ctx())
        .await
        .unwrap()
        .map(|v| v.text())
}

#[tokio::test]
async fn test_lock_command_normalizes_on_store() {
    let fixture = fixture();
    let gem = fixture
        .world
        .create("gem", ObjectKind::Thing, Some(fixture.actor.reference));
    fixture.world.move_to(&gem.reference, Some(fixture.room.reference));

    // `@lock door==#<n>`: a bare reference in the key.
    let line = format!("door==#{}", gem.reference.number);
    let node = Node::command("@lock", vec![], vec![Node::text(line)]);
    let result = eval_text(&fixture, &node).await;
    assert!(result.is_none());

    let stored = fixture
        .world
        .lock_source(&fixture.door.reference, "basic")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, format!("={}", gem.reference));
    assert_eq!(
        fixture.world.sent_to(&fixture.actor.reference),
        vec!["Locked.".to_string()]
    );
}

#[tokio::test]
async fn test_lock_command_rejects_bad_key() {
    let fixture = fixture();
    let node = Node::command("@lock", vec![], vec![Node::text("door=notakey")]);
    eval_text(&fixture, &node).await;
    assert!(fixture
        .world
        .lock_source(&fixture.door.reference, "basic")
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        fixture.world.sent_to(&fixture.actor.reference),
        vec!["I don't understand that key.".to_string()]
    );
}

#[tokio::test]
async fn test_lock_switch_selects_kind_and_unlock_clears() {
    let fixture = fixture();
    let node = Node::command("@lock", vec!["enter"], vec![Node::text("door=#true")]);
    eval_text(&fixture, &node).await;
    assert_eq!(
        fixture
            .world
            .lock_source(&fixture.door.reference, "enter")
            .await
            .unwrap(),
        Some("#true".to_string())
    );

    let node = Node::command("@unlock", vec!["enter"], vec![Node::text("door")]);
    eval_text(&fixture, &node).await;
    assert!(fixture
        .world
        .lock_source(&fixture.door.reference, "enter")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_elock_flag_gate() {
    let fixture = fixture();
    let wizard = fixture.world.create("Morgan", ObjectKind::Player, None);
    fixture.world.give_flag(&wizard.reference, "WIZARD");
    fixture
        .world
        .move_to(&wizard.reference, Some(fixture.room.reference));
    fixture
        .world
        .set_lock(&fixture.door.reference, "basic", Some("flag^WIZARD"))
        .await
        .unwrap();

    let node = Node::function("elock", vec![Node::text("door"), Node::text("Morgan")]);
    assert_eq!(eval_text(&fixture, &node).await.unwrap(), "1");

    let node = Node::function("elock", vec![Node::text("door"), Node::text("Rhea")]);
    assert_eq!(eval_text(&fixture, &node).await.unwrap(), "0");
}

#[tokio::test]
async fn test_elock_without_lock_passes_everyone() {
    let fixture = fixture();
    let node = Node::function("elock", vec![Node::text("door"), Node::text("Rhea")]);
    assert_eq!(eval_text(&fixture, &node).await.unwrap(), "1");
}

#[tokio::test]
async fn test_evaluation_lock_runs_softcode() {
    let fixture = fixture();
    fixture
        .world
        .set_lock(&fixture.door.reference, "basic", Some("CANPASS/1"))
        .await
        .unwrap();
    fixture
        .world
        .set_attribute(&fixture.door.reference, "CANPASS", "1")
        .await
        .unwrap();

    let node = Node::function("elock", vec![Node::text("door"), Node::text("Rhea")]);
    assert_eq!(eval_text(&fixture, &node).await.unwrap(), "1");

    fixture
        .world
        .set_attribute(&fixture.door.reference, "CANPASS", "0")
        .await
        .unwrap();
    assert_eq!(eval_text(&fixture, &node).await.unwrap(), "0");
}

#[tokio::test]
async fn test_evaluation_lock_with_parsed_attribute() {
    let fixture = fixture();
    // The attribute body goes through the softcode parser and evaluator.
    fixture
        .world
        .set_lock(&fixture.door.reference, "basic", Some("CANPASS/2"))
        .await
        .unwrap();
    fixture
        .world
        .set_attribute(&fixture.door.reference, "CANPASS", "add(1,1)")
        .await
        .unwrap();
    fixture.parser.insert(
        "add(1,1)",
        Node::function("add", vec![Node::text("1"), Node::text("1")]),
    );

    let node = Node::function("elock", vec![Node::text("door"), Node::text("Rhea")]);
    assert_eq!(eval_text(&fixture, &node).await.unwrap(), "1");
}

#[tokio::test]
async fn test_recycled_number_cannot_satisfy_old_lock() {
    let fixture = fixture();
    let gem = fixture
        .world
        .create("gem", ObjectKind::Thing, Some(fixture.actor.reference));
    let gem_ref = gem.reference;
    let source = format!("={}", gem_ref);

    let predicate = lock::compile_source(&source, fixture.env()).unwrap();
    assert!(predicate(fixture.door.reference, gem_ref).await);

    fixture.world.destroy(&gem_ref);
    let imposter = fixture
        .world
        .recycle(gem_ref.number, "imposter", ObjectKind::Thing);
    let predicate = lock::compile_source(&source, fixture.env()).unwrap();
    assert!(!predicate(fixture.door.reference, imposter.reference).await);
}

#[tokio::test]
async fn test_connection_and_channel_locks() {
    let fixture = fixture();
    fixture
        .world
        .set_connection(&fixture.actor.reference, "10.0.3.7", "adsl.example.net");
    fixture.world.join_channel(&fixture.actor.reference, "Public");
    let env = fixture.env();
    let door = fixture.door.reference;
    let actor = fixture.actor.reference;

    let cases = [
        ("ip^10.0.*", true),
        ("ip^192.168.*", false),
        ("hostname^*.example.net", true),
        ("hostname^*.example.org", false),
        ("channel^public", true),
        ("channel^admin", false),
    ];
    for (source, expected) in cases {
        let predicate = lock::compile_source(source, env.clone()).unwrap();
        assert_eq!(predicate(door, actor).await, expected, "{}", source);
    }
}

#[tokio::test]
async fn test_name_lock_matches_aliases() {
    let fixture = fixture();
    fixture.world.add_alias(&fixture.actor.reference, "Ry");
    let env = fixture.env();
    let door = fixture.door.reference;
    let actor = fixture.actor.reference;

    for (source, expected) in [("name^rhea", true), ("name^R?", true), ("name^zz*", false)] {
        let predicate = lock::compile_source(source, env.clone()).unwrap();
        assert_eq!(predicate(door, actor).await, expected, "{}", source);
    }
}

#[tokio::test]
async fn test_normalize_is_idempotent_over_composites() {
    let fixture = fixture();
    let gem = fixture
        .world
        .create("gem", ObjectKind::Thing, Some(fixture.actor.reference));
    let world: Arc<dyn WorldService> = fixture.world.clone();

    let sources = [
        format!("=#{}", gem.reference.number),
        format!("(+#{}|$me)&flag^WIZARD", gem.reference.number),
        "ip^10.*|!type^EXIT".to_string(),
        "=#9999".to_string(),
    ];
    for source in sources {
        let node = lock::parse(&source).unwrap();
        let once = lock::normalize(&node, &world).await.unwrap();
        let renode = lock::parse(&once).unwrap();
        let twice = lock::normalize(&renode, &world).await.unwrap();
        assert_eq!(once, twice, "normalize not idempotent for {}", source);
    }
}

/// A world whose storage is down: every call fails.
struct FlakyWorld;

#[async_trait]
impl WorldService for FlakyWorld {
    async fn object(&self, _: &ObjRef) -> Result<Option<ObjectRecord>, WorldError> {
        Err(WorldError::Unavailable("storage down".to_string()))
    }

    async fn locate(&self, _: &ObjRef, _: &str) -> Result<Located, WorldError> {
        Err(WorldError::Unavailable("storage down".to_string()))
    }

    async fn contents(&self, _: &ObjRef) -> Result<Vec<ObjectRecord>, WorldError> {
        Err(WorldError::Unavailable("storage down".to_string()))
    }

    async fn attribute(&self, _: &ObjRef, _: &str) -> Result<Option<String>, WorldError> {
        Err(WorldError::Unavailable("storage down".to_string()))
    }

    async fn set_attribute(&self, _: &ObjRef, _: &str, _: &str) -> Result<(), WorldError> {
        Err(WorldError::Unavailable("storage down".to_string()))
    }

    async fn set_flag(&self, _: &ObjRef, _: &str, _: bool) -> Result<(), WorldError> {
        Err(WorldError::Unavailable("storage down".to_string()))
    }

    async fn lock_source(&self, _: &ObjRef, _: &str) -> Result<Option<String>, WorldError> {
        Err(WorldError::Unavailable("storage down".to_string()))
    }

    async fn set_lock(&self, _: &ObjRef, _: &str, _: Option<&str>) -> Result<(), WorldError> {
        Err(WorldError::Unavailable("storage down".to_string()))
    }

    async fn channels(&self, _: &ObjRef) -> Result<Vec<String>, WorldError> {
        Err(WorldError::Unavailable("storage down".to_string()))
    }

    async fn connection(&self, _: &ObjRef) -> Result<Option<ConnectionInfo>, WorldError> {
        Err(WorldError::Unavailable("storage down".to_string()))
    }

    async fn notify(&self, _: &ObjRef, _: &Markup) -> Result<(), WorldError> {
        Err(WorldError::Unavailable("storage down".to_string()))
    }
}

#[tokio::test]
async fn test_world_failure_resolves_lock_to_false() {
    let env = Arc::new(LockEnv::new(Arc::new(FlakyWorld)));

    let gated = ObjRef::qualified(1, 100);
    let unlocker = ObjRef::qualified(2, 100);
    for source in ["flag^WIZARD", "name^Rhea", "RANK:>5"] {
        let predicate = lock::compile_source(source, env.clone()).unwrap();
        assert!(!predicate(gated, unlocker).await, "{}", source);
    }
    // But its negation still works: !false is true, proving the failure
    // stayed a value instead of escaping as an error.
    let predicate = lock::compile_source("!flag^WIZARD", env).unwrap();
    assert!(predicate(gated, unlocker).await);
}
