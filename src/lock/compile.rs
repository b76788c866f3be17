//! The three lock-compiler passes.
//!
//! * [`normalize`]: canonical source string with object operands fully
//!   qualified, applied whenever a lock is stored.
//! * [`validate`]: conservative structural legality, no existence checks.
//! * [`compile`]: a callable boolean predicate over `(gated, unlocker)`.
//!
//! Predicates never abort an evaluation: any failure inside a leaf (a
//! missing object, an unreadable attribute, a world error) resolves that
//! leaf to `false`.

use async_recursion::async_recursion;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

use super::ast::LockNode;
use super::{parser, LockError};
use crate::dbref::{looks_like_ref, ObjRef};
use crate::wild::wild_match;
use crate::world::{Located, ObjectKind, ObjectRecord, WorldError, WorldService};

/// Softcode escape hatch for evaluation (`attr/value`) locks. Implemented
/// by the evaluation layer; locks only require the one call.
#[async_trait]
pub trait EvalBridge: Send + Sync {
    /// Evaluate `attribute` on `holder` with `enactor` as the enactor and
    /// return the plain-text result.
    async fn eval_attribute(
        &self,
        holder: &ObjRef,
        attribute: &str,
        enactor: &ObjRef,
    ) -> Result<String, WorldError>;
}

/// Everything a compiled predicate may reach for at evaluation time.
pub struct LockEnv {
    pub world: Arc<dyn WorldService>,
    pub softcode: Option<Arc<dyn EvalBridge>>,
    pub max_indirect_depth: u32,
}

impl LockEnv {
    pub fn new(world: Arc<dyn WorldService>) -> Self {
        Self {
            world,
            softcode: None,
            max_indirect_depth: 50,
        }
    }

    pub fn with_softcode(mut self, bridge: Arc<dyn EvalBridge>) -> Self {
        self.softcode = Some(bridge);
        self
    }
}

/// A compiled lock: `(gated, unlocker) -> bool`.
pub type LockPredicate = Box<dyn Fn(ObjRef, ObjRef) -> BoxFuture<'static, bool> + Send + Sync>;

/// Internal predicate form carrying the indirect-delegation depth.
type Pred = Arc<dyn Fn(ObjRef, ObjRef, u32) -> BoxFuture<'static, bool> + Send + Sync>;

/// Compile a parsed lock into a predicate.
pub fn compile(node: &LockNode, env: Arc<LockEnv>) -> LockPredicate {
    let pred = compile_node(node, env);
    Box::new(move |gated, unlocker| pred(gated, unlocker, 0))
}

/// Parse and compile a stored source string in one step.
pub fn compile_source(source: &str, env: Arc<LockEnv>) -> Result<LockPredicate, LockError> {
    let node = parser::parse(source)?;
    Ok(compile(&node, env))
}

/// Canonicalize a lock for storage: every operand shaped like an object
/// reference that denotes an existing object becomes `#number:created`.
/// Anything else (names, `me`, stale references) passes through, which
/// makes the pass idempotent.
#[async_recursion]
pub async fn normalize(
    node: &LockNode,
    world: &Arc<dyn WorldService>,
) -> Result<String, LockError> {
    Ok(match node {
        LockNode::True | LockNode::False => node.source(),
        LockNode::Not(inner) => format!("!{}", normalize(inner, world).await?),
        LockNode::And(left, right) => format!(
            "{}&{}",
            normalize(left, world).await?,
            normalize(right, world).await?
        ),
        LockNode::Or(left, right) => format!(
            "{}|{}",
            normalize(left, world).await?,
            normalize(right, world).await?
        ),
        LockNode::Enclosed(inner) => format!("({})", normalize(inner, world).await?),
        LockNode::Owner(operand) => format!("${}", normalize_operand(operand, world).await?),
        LockNode::Carry(operand) => format!("+{}", normalize_operand(operand, world).await?),
        LockNode::ExactObject(operand) => {
            format!("={}", normalize_operand(operand, world).await?)
        }
        LockNode::Indirect { object, kind } => {
            let object = normalize_operand(object, world).await?;
            match kind {
                Some(kind) => format!("@{}/{}", object, kind),
                None => format!("@{}", object),
            }
        }
        // Non-object leaves already carry their canonical spelling.
        _ => node.source(),
    })
}

async fn normalize_operand(
    operand: &str,
    world: &Arc<dyn WorldService>,
) -> Result<String, LockError> {
    if !looks_like_ref(operand) {
        return Ok(operand.to_string());
    }
    let reference = match operand.parse::<ObjRef>() {
        Ok(reference) => reference,
        Err(_) => return Ok(operand.to_string()),
    };
    match world.object(&reference).await? {
        Some(record) => Ok(record.reference.to_string()),
        None => Ok(operand.to_string()),
    }
}

/// Structural legality. Does not consult the world.
pub fn validate(node: &LockNode) -> bool {
    match node {
        LockNode::True | LockNode::False => true,
        LockNode::Not(inner) | LockNode::Enclosed(inner) => validate(inner),
        LockNode::And(left, right) | LockNode::Or(left, right) => {
            validate(left) && validate(right)
        }
        LockNode::Owner(operand)
        | LockNode::Carry(operand)
        | LockNode::ExactObject(operand) => !operand.is_empty(),
        LockNode::Indirect { object, kind } => {
            !object.is_empty() && kind.as_deref().map_or(true, is_attribute_name)
        }
        LockNode::BitFlag(name) | LockNode::BitPower(name) | LockNode::Channel(name) => {
            !name.is_empty()
        }
        LockNode::BitType(kind) => kind.parse::<ObjectKind>().is_ok(),
        LockNode::DbRefList(attribute) => is_attribute_name(attribute),
        LockNode::Ip(pattern) | LockNode::HostName(pattern) | LockNode::Name(pattern) => {
            !pattern.is_empty()
        }
        LockNode::Attribute { name, .. } | LockNode::Evaluation { name, .. } => {
            is_attribute_name(name)
        }
    }
}

fn is_attribute_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-.~".contains(c))
}

fn compile_node(node: &LockNode, env: Arc<LockEnv>) -> Pred {
    match node {
        LockNode::True => Arc::new(|_, _, _| Box::pin(async { true })),
        LockNode::False => Arc::new(|_, _, _| Box::pin(async { false })),
        LockNode::Enclosed(inner) => compile_node(inner, env),
        LockNode::Not(inner) => {
            let inner = compile_node(inner, env);
            Arc::new(move |gated, unlocker, depth| {
                let inner = inner.clone();
                Box::pin(async move { !inner(gated, unlocker, depth).await })
            })
        }
        LockNode::And(left, right) => {
            let left = compile_node(left, env.clone());
            let right = compile_node(right, env);
            Arc::new(move |gated, unlocker, depth| {
                let left = left.clone();
                let right = right.clone();
                Box::pin(async move {
                    left(gated, unlocker, depth).await && right(gated, unlocker, depth).await
                })
            })
        }
        LockNode::Or(left, right) => {
            let left = compile_node(left, env.clone());
            let right = compile_node(right, env);
            Arc::new(move |gated, unlocker, depth| {
                let left = left.clone();
                let right = right.clone();
                Box::pin(async move {
                    left(gated, unlocker, depth).await || right(gated, unlocker, depth).await
                })
            })
        }
        LockNode::ExactObject(operand) => {
            let env = env.clone();
            let operand = operand.clone();
            Arc::new(move |gated, unlocker, _| {
                let env = env.clone();
                let operand = operand.clone();
                Box::pin(async move {
                    if operand.eq_ignore_ascii_case("me") {
                        return unlocker.matches(&gated);
                    }
                    match resolve(&env, gated, &operand).await {
                        Some(record) => record.reference.matches(&unlocker),
                        None => false,
                    }
                })
            })
        }
        LockNode::Owner(operand) => {
            let env = env.clone();
            let operand = operand.clone();
            Arc::new(move |gated, unlocker, _| {
                let env = env.clone();
                let operand = operand.clone();
                Box::pin(async move {
                    let target = match resolve(&env, gated, &operand).await {
                        Some(record) => record,
                        None => return false,
                    };
                    if target.owner.matches(&unlocker) {
                        return true;
                    }
                    matches!(
                        env.world.object(&unlocker).await,
                        Ok(Some(record)) if target.owner.matches(&record.owner)
                    )
                })
            })
        }
        LockNode::Carry(operand) => {
            let env = env.clone();
            let operand = operand.clone();
            Arc::new(move |_, unlocker, _| {
                let env = env.clone();
                let operand = operand.clone();
                Box::pin(async move {
                    let wanted = match resolve(&env, unlocker, &operand).await {
                        Some(record) => record,
                        None => return false,
                    };
                    match env.world.contents(&unlocker).await {
                        Ok(contents) => contents
                            .iter()
                            .any(|held| held.reference.matches(&wanted.reference)),
                        Err(_) => false,
                    }
                })
            })
        }
        LockNode::Indirect { object, kind } => {
            let env = env.clone();
            let object = object.clone();
            let kind = kind.clone().unwrap_or_else(|| "basic".to_string());
            Arc::new(move |gated, unlocker, depth| {
                let env = env.clone();
                let object = object.clone();
                let kind = kind.clone();
                Box::pin(async move {
                    if depth >= env.max_indirect_depth {
                        debug!(depth, "indirect lock delegation too deep");
                        return false;
                    }
                    let target = match resolve(&env, gated, &object).await {
                        Some(record) => record,
                        None => return false,
                    };
                    let source = match env.world.lock_source(&target.reference, &kind).await {
                        Ok(Some(source)) => source,
                        _ => return false,
                    };
                    let parsed = match parser::parse(&source) {
                        Ok(parsed) => parsed,
                        Err(_) => return false,
                    };
                    let pred = compile_node(&parsed, env.clone());
                    pred(target.reference, unlocker, depth + 1).await
                })
            })
        }
        LockNode::BitFlag(name) => {
            let env = env.clone();
            let name = name.clone();
            Arc::new(move |_, unlocker, _| {
                let env = env.clone();
                let name = name.clone();
                Box::pin(async move {
                    matches!(
                        env.world.object(&unlocker).await,
                        Ok(Some(record)) if record.has_flag(&name)
                    )
                })
            })
        }
        LockNode::BitPower(name) => {
            let env = env.clone();
            let name = name.clone();
            Arc::new(move |_, unlocker, _| {
                let env = env.clone();
                let name = name.clone();
                Box::pin(async move {
                    matches!(
                        env.world.object(&unlocker).await,
                        Ok(Some(record)) if record.has_power(&name)
                    )
                })
            })
        }
        LockNode::BitType(kind) => {
            let env = env.clone();
            let kind = kind.clone();
            Arc::new(move |_, unlocker, _| {
                let env = env.clone();
                let kind = kind.clone();
                Box::pin(async move {
                    let wanted = match kind.parse::<ObjectKind>() {
                        Ok(wanted) => wanted,
                        Err(_) => return false,
                    };
                    matches!(
                        env.world.object(&unlocker).await,
                        Ok(Some(record)) if record.kind == wanted
                    )
                })
            })
        }
        LockNode::Channel(name) => {
            let env = env.clone();
            let name = name.clone();
            Arc::new(move |_, unlocker, _| {
                let env = env.clone();
                let name = name.clone();
                Box::pin(async move {
                    match env.world.channels(&unlocker).await {
                        Ok(channels) => channels.iter().any(|c| c.eq_ignore_ascii_case(&name)),
                        Err(_) => false,
                    }
                })
            })
        }
        LockNode::DbRefList(attribute) => {
            let env = env.clone();
            let attribute = attribute.clone();
            Arc::new(move |gated, unlocker, _| {
                let env = env.clone();
                let attribute = attribute.clone();
                Box::pin(async move {
                    let value = match env.world.attribute(&gated, &attribute).await {
                        Ok(Some(value)) => value,
                        _ => return false,
                    };
                    value
                        .split_whitespace()
                        .filter_map(|word| word.parse::<ObjRef>().ok())
                        .any(|reference| reference.matches(&unlocker))
                })
            })
        }
        LockNode::Ip(pattern) => connection_leaf(env, pattern.clone(), |info| info.ip.clone()),
        LockNode::HostName(pattern) => {
            connection_leaf(env, pattern.clone(), |info| info.hostname.clone())
        }
        LockNode::Name(pattern) => {
            let env = env.clone();
            let pattern = pattern.clone();
            Arc::new(move |_, unlocker, _| {
                let env = env.clone();
                let pattern = pattern.clone();
                Box::pin(async move {
                    match env.world.object(&unlocker).await {
                        Ok(Some(record)) => {
                            wild_match(&pattern, &record.name)
                                || record.aliases.iter().any(|a| wild_match(&pattern, a))
                        }
                        _ => false,
                    }
                })
            })
        }
        LockNode::Attribute { name, value } => {
            let env = env.clone();
            let name = name.clone();
            let value = value.clone();
            Arc::new(move |_, unlocker, _| {
                let env = env.clone();
                let name = name.clone();
                let value = value.clone();
                Box::pin(async move {
                    match env.world.attribute(&unlocker, &name).await {
                        Ok(Some(actual)) => compare_value(&value, &actual),
                        _ => false,
                    }
                })
            })
        }
        LockNode::Evaluation { name, value } => {
            let env = env.clone();
            let name = name.clone();
            let value = value.clone();
            Arc::new(move |gated, unlocker, _| {
                let env = env.clone();
                let name = name.clone();
                let value = value.clone();
                Box::pin(async move {
                    let bridge = match &env.softcode {
                        Some(bridge) => bridge.clone(),
                        None => return false,
                    };
                    match bridge.eval_attribute(&gated, &name, &unlocker).await {
                        Ok(actual) => compare_value(&value, &actual),
                        Err(_) => false,
                    }
                })
            })
        }
    }
}

fn connection_leaf(
    env: Arc<LockEnv>,
    pattern: String,
    project: fn(&crate::world::ConnectionInfo) -> String,
) -> Pred {
    Arc::new(move |_, unlocker, _| {
        let env = env.clone();
        let pattern = pattern.clone();
        Box::pin(async move {
            let owner = match env.world.object(&unlocker).await {
                Ok(Some(record)) => record.owner,
                _ => return false,
            };
            match env.world.connection(&owner).await {
                Ok(Some(info)) => wild_match(&pattern, &project(&info)),
                _ => false,
            }
        })
    })
}

async fn resolve(env: &LockEnv, looker: ObjRef, operand: &str) -> Option<ObjectRecord> {
    match env.world.locate(&looker, operand).await {
        Ok(Located::One(record)) => Some(record),
        _ => None,
    }
}

/// Attribute-value comparison: `>n` / `<n` compare numerically when both
/// sides are numbers (lexicographically otherwise); anything else is a
/// wildcard match, which degenerates to case-insensitive equality when the
/// value has no metacharacters.
fn compare_value(spec: &str, actual: &str) -> bool {
    if let Some(bound) = spec.strip_prefix('>') {
        return ordered(actual, bound, |o| o.is_gt());
    }
    if let Some(bound) = spec.strip_prefix('<') {
        return ordered(actual, bound, |o| o.is_lt());
    }
    wild_match(spec, actual)
}

fn ordered(actual: &str, bound: &str, check: fn(std::cmp::Ordering) -> bool) -> bool {
    match (actual.trim().parse::<f64>(), bound.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).map(check).unwrap_or(false),
        _ => check(actual.to_ascii_lowercase().cmp(&bound.trim().to_ascii_lowercase())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::InMemoryWorld;

    fn env_for(world: Arc<InMemoryWorld>) -> Arc<LockEnv> {
        Arc::new(LockEnv::new(world))
    }

    async fn check(source: &str, env: &Arc<LockEnv>, gated: ObjRef, unlocker: ObjRef) -> bool {
        let pred = compile_source(source, env.clone()).unwrap();
        pred(gated, unlocker).await
    }

    #[tokio::test]
    async fn test_boolean_composition() {
        let world = Arc::new(InMemoryWorld::new());
        let a = world.create("a", ObjectKind::Thing, None).reference;
        let b = world.create("b", ObjectKind::Thing, None).reference;
        let env = env_for(world);

        assert!(check("#true&#true", &env, a, b).await);
        assert!(!check("#true&#false", &env, a, b).await);
        assert!(check("#true|#false", &env, a, b).await);
        assert!(!check("#false|#false", &env, a, b).await);
        assert!(check("!#false", &env, a, b).await);
        assert!(!check("!#true", &env, a, b).await);
    }

    #[tokio::test]
    async fn test_flag_power_type_leaves() {
        let world = Arc::new(InMemoryWorld::new());
        let gate = world.create("gate", ObjectKind::Exit, None).reference;
        let wizard = world.create("Morgan", ObjectKind::Player, None).reference;
        let peasant = world.create("Pip", ObjectKind::Player, None).reference;
        world.give_flag(&wizard, "WIZARD");
        world.give_power(&wizard, "BOOT");
        let env = env_for(world);

        assert!(check("flag^WIZARD", &env, gate, wizard).await);
        assert!(!check("flag^WIZARD", &env, gate, peasant).await);
        assert!(check("power^boot", &env, gate, wizard).await);
        assert!(check("type^PLAYER", &env, gate, peasant).await);
        assert!(!check("type^ROOM", &env, gate, peasant).await);
    }

    #[tokio::test]
    async fn test_exact_and_me() {
        let world = Arc::new(InMemoryWorld::new());
        let door = world.create("door", ObjectKind::Exit, None).reference;
        let keyholder = world.create("Kay", ObjectKind::Player, None);
        let other = world.create("Ox", ObjectKind::Player, None).reference;
        let env = env_for(world);

        let source = format!("={}", keyholder.reference);
        assert!(check(&source, &env, door, keyholder.reference).await);
        assert!(!check(&source, &env, door, other).await);
        assert!(check("=me", &env, door, door).await);
        assert!(!check("=me", &env, door, other).await);
    }

    #[tokio::test]
    async fn test_carry_membership() {
        let world = Arc::new(InMemoryWorld::new());
        let door = world.create("door", ObjectKind::Exit, None).reference;
        let player = world.create("Kay", ObjectKind::Player, None).reference;
        let lantern = world.create("lantern", ObjectKind::Thing, Some(player));
        world.move_to(&lantern.reference, Some(player));
        let env = env_for(world);

        assert!(check("+lantern", &env, door, player).await);
        assert!(!check("+torch", &env, door, player).await);
    }

    #[tokio::test]
    async fn test_dbreflist_and_attribute() {
        let world = Arc::new(InMemoryWorld::new());
        let vault = world.create("vault", ObjectKind::Thing, None).reference;
        let friend = world.create("Fi", ObjectKind::Player, None).reference;
        let stranger = world.create("St", ObjectKind::Player, None).reference;
        world
            .set_attribute(&vault, "FRIENDS", &friend.to_string())
            .await
            .unwrap();
        world.set_attribute(&friend, "RANK", "7").await.unwrap();
        world.set_attribute(&stranger, "RANK", "3").await.unwrap();
        let env = env_for(world);

        assert!(check("dbreflist^FRIENDS", &env, vault, friend).await);
        assert!(!check("dbreflist^FRIENDS", &env, vault, stranger).await);
        assert!(check("RANK:>5", &env, vault, friend).await);
        assert!(!check("RANK:>5", &env, vault, stranger).await);
        assert!(check("RANK:<5", &env, vault, stranger).await);
        assert!(check("RANK:7", &env, vault, friend).await);
    }

    #[tokio::test]
    async fn test_indirect_delegation_and_depth_cap() {
        let world = Arc::new(InMemoryWorld::new());
        let door = world.create("door", ObjectKind::Exit, None).reference;
        let template = world.create("template", ObjectKind::Thing, None).reference;
        let wizard = world.create("Morgan", ObjectKind::Player, None).reference;
        world.give_flag(&wizard, "WIZARD");
        world
            .set_lock(&template, "basic", Some("flag^WIZARD"))
            .await
            .unwrap();
        // Self-referential lock must terminate at the depth cap.
        world
            .set_lock(&door, "basic", Some(&format!("@{}", door)))
            .await
            .unwrap();
        let env = env_for(world);

        let source = format!("@{}", template);
        assert!(check(&source, &env, door, wizard).await);
        let source = format!("@{}", door);
        assert!(!check(&source, &env, door, wizard).await);
    }

    #[tokio::test]
    async fn test_normalize_qualifies_existing_bare_refs() {
        let world: Arc<InMemoryWorld> = Arc::new(InMemoryWorld::new());
        let thing = world.create("thing", ObjectKind::Thing, None);
        let service: Arc<dyn WorldService> = world.clone();
        let bare = format!("=#{}", thing.reference.number);
        let node = parser::parse(&bare).unwrap();

        let normalized = normalize(&node, &service).await.unwrap();
        assert_eq!(normalized, format!("={}", thing.reference));

        // Idempotent, and non-existent references pass through unchanged.
        let renode = parser::parse(&normalized).unwrap();
        assert_eq!(normalize(&renode, &service).await.unwrap(), normalized);
        let missing = parser::parse("=#9999").unwrap();
        assert_eq!(normalize(&missing, &service).await.unwrap(), "=#9999");
    }

    #[tokio::test]
    async fn test_normalize_walks_composites() {
        let world: Arc<InMemoryWorld> = Arc::new(InMemoryWorld::new());
        let a = world.create("a", ObjectKind::Thing, None);
        let service: Arc<dyn WorldService> = world.clone();
        let source = format!("(+#{}|$me)&flag^WIZARD", a.reference.number);
        let node = parser::parse(&source).unwrap();
        let normalized = normalize(&node, &service).await.unwrap();
        assert_eq!(
            normalized,
            format!("(+{}|$me)&flag^WIZARD", a.reference)
        );
    }

    #[test]
    fn test_validate_structural_rules() {
        assert!(validate(&parser::parse("type^PLAYER").unwrap()));
        assert!(!validate(&parser::parse("type^DRAGON").unwrap()));
        assert!(validate(&parser::parse("flag^WIZARD&!#false").unwrap()));
        assert!(validate(&parser::parse("dbreflist^FRIENDS").unwrap()));
        assert!(!validate(&LockNode::DbRefList("no spaces".to_string())));
        assert!(!validate(&LockNode::Owner(String::new())));
    }

    #[test]
    fn test_compare_value_semantics() {
        assert!(compare_value(">5", "7"));
        assert!(!compare_value(">5", "3"));
        assert!(compare_value("<5", "3"));
        assert!(compare_value("w?z*", "wizard"));
        assert!(compare_value("exact", "EXACT"));
        assert!(!compare_value("exact", "different"));
    }
}
