//! Parser for the lock-expression grammar.
//!
//! The operator set is a fixed contract: `!` (not), `&` (and), `|` (or),
//! parentheses, `#true`/`#false`, the object operators `$` (owner), `+`
//! (carry), `=` (exact), `@` (indirect), the caret predicates `flag^`,
//! `power^`, `type^`, `channel^`, `dbreflist^`, `ip^`, `hostname^`,
//! `name^`, and the attribute forms `attr:value` / `attr/value`.

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while, take_while1},
    character::complete::{alpha1, char, multispace0},
    combinator::{all_consuming, map, value},
    multi::fold_many0,
    sequence::{delimited, preceded, terminated},
    IResult,
};
use tracing::instrument;

use super::ast::LockNode;
use super::LockError;

/// Parse a complete lock source string.
#[instrument(level = "debug", skip(input))]
pub fn parse(input: &str) -> Result<LockNode, LockError> {
    match all_consuming(delimited(multispace0, parse_or, multispace0))(input) {
        Ok((_, node)) => Ok(node),
        Err(e) => Err(LockError::Parse(e.to_string())),
    }
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn parse_or(input: &str) -> IResult<&str, LockNode> {
    let (input, first) = parse_and(input)?;
    fold_many0(
        preceded(ws(char('|')), parse_and),
        move || first.clone(),
        LockNode::or,
    )(input)
}

fn parse_and(input: &str) -> IResult<&str, LockNode> {
    let (input, first) = parse_unary(input)?;
    fold_many0(
        preceded(ws(char('&')), parse_unary),
        move || first.clone(),
        LockNode::and,
    )(input)
}

fn parse_unary(input: &str) -> IResult<&str, LockNode> {
    alt((
        map(preceded(ws(char('!')), parse_unary), LockNode::not),
        parse_primary,
    ))(input)
}

fn parse_primary(input: &str) -> IResult<&str, LockNode> {
    alt((
        map(
            delimited(ws(char('(')), parse_or, ws(char(')'))),
            |inner| LockNode::Enclosed(Box::new(inner)),
        ),
        value(LockNode::True, tag_no_case("#true")),
        value(LockNode::False, tag_no_case("#false")),
        parse_caret,
        map(preceded(char('$'), object_operand), LockNode::Owner),
        map(preceded(char('+'), object_operand), LockNode::Carry),
        map(preceded(char('='), object_operand), LockNode::ExactObject),
        parse_indirect,
        parse_attribute,
    ))(input)
}

/// The `keyword^operand` predicate family.
fn parse_caret(input: &str) -> IResult<&str, LockNode> {
    let (rest, keyword) = terminated(alpha1, char('^'))(input)?;
    let (rest, operand) = object_operand(rest)?;
    let node = match keyword.to_ascii_lowercase().as_str() {
        "flag" => LockNode::BitFlag(operand),
        "power" => LockNode::BitPower(operand),
        "type" => LockNode::BitType(operand),
        "channel" => LockNode::Channel(operand),
        "dbreflist" => LockNode::DbRefList(operand),
        "ip" => LockNode::Ip(operand),
        "hostname" => LockNode::HostName(operand),
        "name" => LockNode::Name(operand),
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )))
        }
    };
    Ok((rest, node))
}

fn parse_indirect(input: &str) -> IResult<&str, LockNode> {
    let (input, _) = char('@')(input)?;
    let (input, object) = map(
        take_while1(|c: char| !"&|()!/".contains(c)),
        |s: &str| s.trim().to_string(),
    )(input)?;
    let (input, kind) = nom::combinator::opt(preceded(char('/'), attribute_name))(input)?;
    Ok((input, LockNode::Indirect { object, kind }))
}

fn parse_attribute(input: &str) -> IResult<&str, LockNode> {
    let (input, name) = attribute_name(input)?;
    let (input, separator) = alt((char(':'), char('/')))(input)?;
    let (input, value) = map(take_while(|c: char| !"&|()".contains(c)), |s: &str| {
        s.trim().to_string()
    })(input)?;
    let node = match separator {
        ':' => LockNode::Attribute { name, value },
        _ => LockNode::Evaluation { name, value },
    };
    Ok((input, node))
}

fn attribute_name(input: &str) -> IResult<&str, String> {
    map(
        take_while1(|c: char| c.is_ascii_alphanumeric() || "_-.~".contains(c)),
        |s: &str| s.to_string(),
    )(input)
}

/// Free-form operand: everything up to the next structural character.
fn object_operand(input: &str) -> IResult<&str, String> {
    map(take_while1(|c: char| !"&|()!".contains(c)), |s: &str| {
        s.trim().to_string()
    })(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_booleans_and_not() {
        assert_eq!(parse("#true").unwrap(), LockNode::True);
        assert_eq!(parse("#FALSE").unwrap(), LockNode::False);
        assert_eq!(parse("!#true").unwrap(), LockNode::not(LockNode::True));
    }

    #[test]
    fn test_precedence_and_binds_tighter() {
        let node = parse("#true & #false | #true").unwrap();
        assert_eq!(
            node,
            LockNode::or(LockNode::and(LockNode::True, LockNode::False), LockNode::True)
        );
    }

    #[test]
    fn test_enclosed_grouping() {
        let node = parse("#true & (#false | #true)").unwrap();
        assert_eq!(
            node,
            LockNode::and(
                LockNode::True,
                LockNode::Enclosed(Box::new(LockNode::or(LockNode::False, LockNode::True)))
            )
        );
    }

    #[test]
    fn test_object_operators() {
        assert_eq!(parse("$#5").unwrap(), LockNode::Owner("#5".to_string()));
        assert_eq!(parse("+lantern").unwrap(), LockNode::Carry("lantern".to_string()));
        assert_eq!(parse("=me").unwrap(), LockNode::ExactObject("me".to_string()));
        assert_eq!(
            parse("@#12/enter").unwrap(),
            LockNode::Indirect {
                object: "#12".to_string(),
                kind: Some("enter".to_string()),
            }
        );
        assert_eq!(
            parse("@#12").unwrap(),
            LockNode::Indirect {
                object: "#12".to_string(),
                kind: None,
            }
        );
    }

    #[test]
    fn test_caret_predicates() {
        assert_eq!(parse("flag^WIZARD").unwrap(), LockNode::BitFlag("WIZARD".to_string()));
        assert_eq!(parse("TYPE^PLAYER").unwrap(), LockNode::BitType("PLAYER".to_string()));
        assert_eq!(
            parse("ip^10.0.*").unwrap(),
            LockNode::Ip("10.0.*".to_string())
        );
        assert_eq!(
            parse("dbreflist^FRIENDS").unwrap(),
            LockNode::DbRefList("FRIENDS".to_string())
        );
        assert!(parse("bogus^THING").is_err());
    }

    #[test]
    fn test_attribute_forms() {
        assert_eq!(
            parse("RANK:>5").unwrap(),
            LockNode::Attribute {
                name: "RANK".to_string(),
                value: ">5".to_string(),
            }
        );
        assert_eq!(
            parse("CANPASS/1").unwrap(),
            LockNode::Evaluation {
                name: "CANPASS".to_string(),
                value: "1".to_string(),
            }
        );
    }

    #[test]
    fn test_compound_expression() {
        let node = parse("flag^WIZARD | ($#1 & !name^Guest*)").unwrap();
        assert_eq!(
            node,
            LockNode::or(
                LockNode::BitFlag("WIZARD".to_string()),
                LockNode::Enclosed(Box::new(LockNode::and(
                    LockNode::Owner("#1".to_string()),
                    LockNode::not(LockNode::Name("Guest*".to_string()))
                )))
            )
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("&&").is_err());
        assert!(parse("justaword").is_err());
        assert!(parse("flag^WIZARD extra(").is_err());
    }

    #[test]
    fn test_source_roundtrip() {
        for source in [
            "#true",
            "!flag^WIZARD",
            "flag^WIZARD&power^BUILDER",
            "(=#5:100|$#1)&!type^EXIT",
            "RANK:>5|CANPASS/1",
            "@#12/enter",
        ] {
            let node = parse(source).unwrap();
            assert_eq!(parse(&node.source()).unwrap(), node);
        }
    }
}
