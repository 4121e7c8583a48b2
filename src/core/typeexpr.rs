//! SF-006: Type expressions for input variables and output values.
//!
//! Grammar:
//!
//! ```text
//! type    = "any" | "string" | "number" | "bool"
//!         | ("list" | "set" | "map") "(" type ")"
//!         | "tuple" "(" "[" [type {"," type}] "]" ")"
//!         | "object" "(" "{" {attr [","]} "}" ")"
//!         | "providerconfig" "(" local_name ")"
//! attr    = name "=" (type | "optional" "(" type ["," literal] ")")
//! literal = string | number | "true" | "false" | "null"
//!         | "[" [literal {"," literal}] "]" | "{" {key "=" literal [","]} "}"
//! ```
//!
//! `providerconfig(name)` refers to a provider by the local name declared in
//! the stack's `required_providers`. Its type has reference identity: two
//! provider config types are equal only if they are the same instance, so
//! every stack in a tree must share one instance per provider. The
//! `TypeInformation` trait is how the evaluator reaches that shared state.

use super::diagnostics::{Diagnostic, Diagnostics, SourceRange};
use super::types::ProviderAddr;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Types
// ============================================================================

/// The configuration type of one provider.
///
/// Equality is identity: clones of one instance are equal, separately
/// created instances never are, even for the same provider.
#[derive(Debug, Clone)]
pub struct ProviderConfigType(Arc<ProviderAddr>);

impl ProviderConfigType {
    pub fn new(provider: ProviderAddr) -> Self {
        Self(Arc::new(provider))
    }

    pub fn provider(&self) -> &ProviderAddr {
        &self.0
    }
}

impl PartialEq for ProviderConfigType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ProviderConfigType {}

/// A resolved type constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Any,
    String,
    Number,
    Bool,
    List(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>),
    Tuple(Vec<Type>),
    Object {
        attributes: BTreeMap<String, Type>,
        optional: BTreeSet<String>,
    },
    ProviderConfig(ProviderConfigType),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Bool => write!(f, "bool"),
            Self::List(e) => write!(f, "list({})", e),
            Self::Set(e) => write!(f, "set({})", e),
            Self::Map(e) => write!(f, "map({})", e),
            Self::Tuple(elems) => {
                let parts: Vec<String> = elems.iter().map(|t| t.to_string()).collect();
                write!(f, "tuple([{}])", parts.join(", "))
            }
            Self::Object {
                attributes,
                optional,
            } => {
                let parts: Vec<String> = attributes
                    .iter()
                    .map(|(name, ty)| {
                        if optional.contains(name) {
                            format!("{} = optional({})", name, ty)
                        } else {
                            format!("{} = {}", name, ty)
                        }
                    })
                    .collect();
                write!(f, "object({{{}}})", parts.join(", "))
            }
            Self::ProviderConfig(p) => write!(f, "providerconfig({})", p.provider()),
        }
    }
}

/// Default values declared with `optional(type, default)`, mirroring the
/// nesting of the type they belong to.
///
/// `defaults` is keyed by object attribute name. `children` is keyed by
/// attribute name, tuple index, or `*` for collection elements.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefaults {
    pub ty: Type,
    pub defaults: BTreeMap<String, Value>,
    pub children: BTreeMap<String, TypeDefaults>,
}

impl TypeDefaults {
    /// Attribute paths (dotted) that carry a default, in sorted order.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths("", &mut out);
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for name in self.defaults.keys() {
            out.push(format!("{}{}", prefix, name));
        }
        for (key, child) in &self.children {
            child.collect_paths(&format!("{}{}.", prefix, key), out);
        }
    }
}

/// What the evaluator needs to know about providers.
pub trait TypeInformation {
    /// The canonical config type already chosen for `provider`, if any.
    fn provider_config_type(&self, provider: &ProviderAddr) -> Option<Type>;

    /// Look up a provider local name in the current stack.
    fn provider_for_local_name(&self, local_name: &str) -> Option<ProviderAddr>;

    /// Record the canonical config type for `provider`.
    fn set_provider_config_type(&mut self, provider: ProviderAddr, ty: Type);
}

// ============================================================================
// Evaluation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{summary}: {detail}")]
struct TypeExprError {
    summary: &'static str,
    detail: String,
    offset: usize,
}

impl TypeExprError {
    fn invalid(detail: impl Into<String>, offset: usize) -> Self {
        Self {
            summary: "Invalid type specification",
            detail: detail.into(),
            offset,
        }
    }
}

/// Decode a type expression.
///
/// On failure the type is `Type::Any`, defaults are `None`, and the
/// diagnostics explain why.
pub fn type_constraint(
    expr: &str,
    range: &SourceRange,
    info: &mut dyn TypeInformation,
) -> (Type, Option<TypeDefaults>, Diagnostics) {
    let result = tokenize(expr).and_then(|toks| {
        let mut parser = Parser {
            toks,
            pos: 0,
            depth: 0,
            info,
        };
        let parsed = parser.parse_type()?;
        parser.expect_eof()?;
        Ok(parsed)
    });
    match result {
        Ok((ty, defaults)) => (ty, defaults, Diagnostics::new()),
        Err(e) => {
            let diag = Diagnostic::error(e.summary)
                .with_detail(format!(
                    "{} (in {:?}, at column {}).",
                    e.detail,
                    expr,
                    e.offset + 1
                ))
                .with_subject(range.clone());
            (Type::Any, None, Diagnostics::from(diag))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(serde_json::Number),
    LParen,
    RParen,
    LBrack,
    RBrack,
    LBrace,
    RBrace,
    Comma,
    Equals,
    Eof,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "{:?}", s),
            Self::Str(s) => write!(f, "string {:?}", s),
            Self::Num(n) => write!(f, "number {}", n),
            Self::LParen => write!(f, "\"(\""),
            Self::RParen => write!(f, "\")\""),
            Self::LBrack => write!(f, "\"[\""),
            Self::RBrack => write!(f, "\"]\""),
            Self::LBrace => write!(f, "\"{{\""),
            Self::RBrace => write!(f, "\"}}\""),
            Self::Comma => write!(f, "\",\""),
            Self::Equals => write!(f, "\"=\""),
            Self::Eof => write!(f, "end of expression"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
}

fn tokenize(src: &str) -> Result<Vec<Token>, TypeExprError> {
    let bytes = src.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let simple = match c {
            b'(' => Some(Tok::LParen),
            b')' => Some(Tok::RParen),
            b'[' => Some(Tok::LBrack),
            b']' => Some(Tok::RBrack),
            b'{' => Some(Tok::LBrace),
            b'}' => Some(Tok::RBrace),
            b',' => Some(Tok::Comma),
            b'=' => Some(Tok::Equals),
            _ => None,
        };
        if let Some(tok) = simple {
            toks.push(Token { tok, offset: start });
            i += 1;
            continue;
        }
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'-')
            {
                i += 1;
            }
            toks.push(Token {
                tok: Tok::Ident(src[start..i].to_string()),
                offset: start,
            });
        } else if c.is_ascii_digit() || (c == b'-' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            i += 1;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || matches!(bytes[i], b'.' | b'e' | b'E' | b'+' | b'-')) {
                i += 1;
            }
            let n: serde_json::Number = serde_json::from_str(&src[start..i])
                .map_err(|_| TypeExprError::invalid(format!("invalid number {:?}", &src[start..i]), start))?;
            toks.push(Token {
                tok: Tok::Num(n),
                offset: start,
            });
        } else if c == b'"' {
            i += 1;
            while i < bytes.len() && bytes[i] != b'"' {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            if i >= bytes.len() {
                return Err(TypeExprError::invalid("unterminated string literal", start));
            }
            i += 1;
            let s: String = serde_json::from_str(&src[start..i])
                .map_err(|e| TypeExprError::invalid(format!("invalid string literal: {}", e), start))?;
            toks.push(Token {
                tok: Tok::Str(s),
                offset: start,
            });
        } else {
            let ch = src[start..].chars().next().unwrap_or('?');
            return Err(TypeExprError::invalid(format!("unexpected character {:?}", ch), start));
        }
    }
    toks.push(Token {
        tok: Tok::Eof,
        offset: src.len(),
    });
    Ok(toks)
}

/// Deepest nesting of type constructors and default literals accepted.
const MAX_TYPE_NESTING: usize = 64;

struct Parser<'a> {
    toks: Vec<Token>,
    pos: usize,
    depth: usize,
    info: &'a mut dyn TypeInformation,
}

impl Parser<'_> {
    /// Run `f` one nesting level deeper, failing past `MAX_TYPE_NESTING`.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, TypeExprError>,
    ) -> Result<T, TypeExprError> {
        if self.depth >= MAX_TYPE_NESTING {
            return Err(TypeExprError::invalid(
                "type expression is nested too deeply",
                self.peek().offset,
            ));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Tok) -> Result<(), TypeExprError> {
        let got = self.next();
        if got.tok == want {
            Ok(())
        } else {
            Err(TypeExprError::invalid(
                format!("expected {} but found {}", want, got.tok),
                got.offset,
            ))
        }
    }

    fn eat(&mut self, want: &Tok) -> bool {
        if &self.peek().tok == want {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect_eof(&mut self) -> Result<(), TypeExprError> {
        let tok = self.peek().clone();
        match tok.tok {
            Tok::Eof => Ok(()),
            other => Err(TypeExprError::invalid(
                format!("unexpected {} after the type", other),
                tok.offset,
            )),
        }
    }

    fn parse_type(&mut self) -> Result<(Type, Option<TypeDefaults>), TypeExprError> {
        self.nested(Self::parse_type_at_depth)
    }

    fn parse_type_at_depth(&mut self) -> Result<(Type, Option<TypeDefaults>), TypeExprError> {
        let tok = self.next();
        let keyword = match tok.tok {
            Tok::Ident(name) => name,
            other => {
                return Err(TypeExprError::invalid(
                    format!("expected a type keyword but found {}", other),
                    tok.offset,
                ))
            }
        };
        match keyword.as_str() {
            "any" => Ok((Type::Any, None)),
            "string" => Ok((Type::String, None)),
            "number" => Ok((Type::Number, None)),
            "bool" => Ok((Type::Bool, None)),
            "list" | "set" | "map" => {
                self.expect(Tok::LParen)?;
                let (elem, elem_defaults) = self.parse_type()?;
                self.expect(Tok::RParen)?;
                let ty = match keyword.as_str() {
                    "list" => Type::List(Box::new(elem)),
                    "set" => Type::Set(Box::new(elem)),
                    _ => Type::Map(Box::new(elem)),
                };
                let children = elem_defaults
                    .map(|d| BTreeMap::from([("*".to_string(), d)]))
                    .unwrap_or_default();
                Ok(with_defaults(ty, BTreeMap::new(), children))
            }
            "tuple" => {
                self.expect(Tok::LParen)?;
                self.expect(Tok::LBrack)?;
                let mut elems = Vec::new();
                let mut children = BTreeMap::new();
                while !self.eat(&Tok::RBrack) {
                    let (elem, d) = self.parse_type()?;
                    if let Some(d) = d {
                        children.insert(elems.len().to_string(), d);
                    }
                    elems.push(elem);
                    if !self.eat(&Tok::Comma) {
                        self.expect(Tok::RBrack)?;
                        break;
                    }
                }
                self.expect(Tok::RParen)?;
                Ok(with_defaults(Type::Tuple(elems), BTreeMap::new(), children))
            }
            "object" => {
                self.expect(Tok::LParen)?;
                self.expect(Tok::LBrace)?;
                let parsed = self.parse_object_attrs()?;
                self.expect(Tok::RParen)?;
                Ok(parsed)
            }
            "providerconfig" => {
                self.expect(Tok::LParen)?;
                let name_tok = self.next();
                let Tok::Ident(local_name) = name_tok.tok else {
                    return Err(TypeExprError::invalid(
                        "providerconfig requires a provider local name",
                        name_tok.offset,
                    ));
                };
                self.expect(Tok::RParen)?;
                let ty = self.provider_config(&local_name, name_tok.offset)?;
                Ok((ty, None))
            }
            "optional" => Err(TypeExprError::invalid(
                "optional is only allowed as the type of an object attribute",
                tok.offset,
            )),
            other => Err(TypeExprError::invalid(
                format!("the keyword {:?} is not a valid type constructor", other),
                tok.offset,
            )),
        }
    }

    fn parse_object_attrs(&mut self) -> Result<(Type, Option<TypeDefaults>), TypeExprError> {
        let mut attributes = BTreeMap::new();
        let mut optional = BTreeSet::new();
        let mut defaults = BTreeMap::new();
        let mut children = BTreeMap::new();

        while !self.eat(&Tok::RBrace) {
            let name_tok = self.next();
            let name = match name_tok.tok {
                Tok::Ident(n) | Tok::Str(n) => n,
                other => {
                    return Err(TypeExprError::invalid(
                        format!("expected an attribute name but found {}", other),
                        name_tok.offset,
                    ))
                }
            };
            if attributes.contains_key(&name) {
                return Err(TypeExprError::invalid(
                    format!("duplicate object attribute {:?}", name),
                    name_tok.offset,
                ));
            }
            self.expect(Tok::Equals)?;

            let is_optional = matches!(&self.peek().tok, Tok::Ident(k) if k == "optional");
            let (ty, d) = if is_optional {
                self.next();
                self.expect(Tok::LParen)?;
                let (ty, d) = self.parse_type()?;
                if self.eat(&Tok::Comma) {
                    let at = self.peek().offset;
                    let value = self.parse_literal()?;
                    check_default(&value, &ty).map_err(|e| {
                        TypeExprError::invalid(
                            format!("invalid default value for optional attribute {:?}: {}", name, e),
                            at,
                        )
                    })?;
                    defaults.insert(name.clone(), value);
                }
                self.expect(Tok::RParen)?;
                optional.insert(name.clone());
                (ty, d)
            } else {
                self.parse_type()?
            };

            if let Some(d) = d {
                children.insert(name.clone(), d);
            }
            attributes.insert(name, ty);
            self.eat(&Tok::Comma);
        }

        let ty = Type::Object {
            attributes,
            optional,
        };
        Ok(with_defaults(ty, defaults, children))
    }

    fn parse_literal(&mut self) -> Result<Value, TypeExprError> {
        self.nested(Self::parse_literal_at_depth)
    }

    fn parse_literal_at_depth(&mut self) -> Result<Value, TypeExprError> {
        let tok = self.next();
        match tok.tok {
            Tok::Str(s) => Ok(Value::String(s)),
            Tok::Num(n) => Ok(Value::Number(n)),
            Tok::Ident(ref k) if k == "true" => Ok(Value::Bool(true)),
            Tok::Ident(ref k) if k == "false" => Ok(Value::Bool(false)),
            Tok::Ident(ref k) if k == "null" => Ok(Value::Null),
            Tok::LBrack => {
                let mut items = Vec::new();
                while !self.eat(&Tok::RBrack) {
                    items.push(self.parse_literal()?);
                    if !self.eat(&Tok::Comma) {
                        self.expect(Tok::RBrack)?;
                        break;
                    }
                }
                Ok(Value::Array(items))
            }
            Tok::LBrace => {
                let mut map = serde_json::Map::new();
                while !self.eat(&Tok::RBrace) {
                    let key_tok = self.next();
                    let key = match key_tok.tok {
                        Tok::Ident(k) | Tok::Str(k) => k,
                        other => {
                            return Err(TypeExprError::invalid(
                                format!("expected a key but found {}", other),
                                key_tok.offset,
                            ))
                        }
                    };
                    self.expect(Tok::Equals)?;
                    let value = self.parse_literal()?;
                    map.insert(key, value);
                    self.eat(&Tok::Comma);
                }
                Ok(Value::Object(map))
            }
            other => Err(TypeExprError::invalid(
                format!("expected a literal default value but found {}", other),
                tok.offset,
            )),
        }
    }

    fn provider_config(&mut self, local_name: &str, offset: usize) -> Result<Type, TypeExprError> {
        let Some(provider) = self.info.provider_for_local_name(local_name) else {
            return Err(TypeExprError {
                summary: "Unknown provider local name",
                detail: format!(
                    "This stack has no provider named {:?} in its required_providers",
                    local_name
                ),
                offset,
            });
        };
        if let Some(ty) = self.info.provider_config_type(&provider) {
            return Ok(ty);
        }
        let ty = Type::ProviderConfig(ProviderConfigType::new(provider.clone()));
        self.info.set_provider_config_type(provider, ty.clone());
        Ok(ty)
    }
}

fn with_defaults(
    ty: Type,
    defaults: BTreeMap<String, Value>,
    children: BTreeMap<String, TypeDefaults>,
) -> (Type, Option<TypeDefaults>) {
    if defaults.is_empty() && children.is_empty() {
        return (ty, None);
    }
    let d = TypeDefaults {
        ty: ty.clone(),
        defaults,
        children,
    };
    (ty, Some(d))
}

/// Check that a literal default conforms to the attribute's type.
fn check_default(value: &Value, ty: &Type) -> Result<(), String> {
    match (ty, value) {
        (_, Value::Null) | (Type::Any, _) => Ok(()),
        (Type::String, Value::String(_) | Value::Number(_) | Value::Bool(_)) => Ok(()),
        (Type::Number, Value::Number(_)) => Ok(()),
        (Type::Number, Value::String(s)) if s.parse::<f64>().is_ok() => Ok(()),
        (Type::Bool, Value::Bool(_)) => Ok(()),
        (Type::Bool, Value::String(s)) if s == "true" || s == "false" => Ok(()),
        (Type::List(elem) | Type::Set(elem), Value::Array(items)) => {
            items.iter().try_for_each(|item| check_default(item, elem))
        }
        (Type::Map(elem), Value::Object(map)) => {
            map.values().try_for_each(|item| check_default(item, elem))
        }
        (Type::Tuple(elems), Value::Array(items)) => {
            if elems.len() != items.len() {
                return Err(format!(
                    "tuple requires {} elements, got {}",
                    elems.len(),
                    items.len()
                ));
            }
            elems
                .iter()
                .zip(items)
                .try_for_each(|(t, item)| check_default(item, t))
        }
        (
            Type::Object {
                attributes,
                optional,
            },
            Value::Object(map),
        ) => {
            if let Some(extra) = map.keys().find(|k| !attributes.contains_key(*k)) {
                return Err(format!("unexpected attribute {:?}", extra));
            }
            for (name, attr_ty) in attributes {
                match map.get(name) {
                    Some(v) => check_default(v, attr_ty).map_err(|e| format!("{}: {}", name, e))?,
                    None if optional.contains(name) => {}
                    None => return Err(format!("attribute {:?} is required", name)),
                }
            }
            Ok(())
        }
        (ty, v) => Err(format!("a {} value is not allowed for type {}", json_kind(v), ty)),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Type information backed by plain maps, counting registry writes.
    #[derive(Default)]
    struct FakeInfo {
        names: HashMap<String, ProviderAddr>,
        types: HashMap<ProviderAddr, Type>,
        sets: usize,
    }

    impl FakeInfo {
        fn with_provider(local: &str, addr: &str) -> Self {
            let mut info = Self::default();
            info.names
                .insert(local.to_string(), ProviderAddr::parse(addr).unwrap());
            info
        }
    }

    impl TypeInformation for FakeInfo {
        fn provider_config_type(&self, provider: &ProviderAddr) -> Option<Type> {
            self.types.get(provider).cloned()
        }

        fn provider_for_local_name(&self, local_name: &str) -> Option<ProviderAddr> {
            self.names.get(local_name).cloned()
        }

        fn set_provider_config_type(&mut self, provider: ProviderAddr, ty: Type) {
            self.sets += 1;
            self.types.insert(provider, ty);
        }
    }

    fn range() -> SourceRange {
        SourceRange::at_path("main.stack.yaml", "variables.x.type")
    }

    fn decode(expr: &str) -> (Type, Option<TypeDefaults>, Diagnostics) {
        type_constraint(expr, &range(), &mut FakeInfo::default())
    }

    #[test]
    fn test_sf006_primitives() {
        for (expr, want) in [
            ("string", Type::String),
            ("number", Type::Number),
            ("bool", Type::Bool),
            ("  any ", Type::Any),
        ] {
            let (ty, defaults, diags) = decode(expr);
            assert!(diags.is_empty(), "{}: {:?}", expr, diags);
            assert_eq!(ty, want);
            assert!(defaults.is_none());
        }
    }

    #[test]
    fn test_sf006_collections_and_display() {
        let (ty, _, diags) = decode("map(list(set(string)))");
        assert!(diags.is_empty());
        assert_eq!(ty.to_string(), "map(list(set(string)))");

        let (ty, _, diags) = decode("tuple([string, number, bool])");
        assert!(diags.is_empty());
        assert_eq!(
            ty,
            Type::Tuple(vec![Type::String, Type::Number, Type::Bool])
        );
    }

    #[test]
    fn test_sf006_object_with_optional_defaults() {
        let (ty, defaults, diags) = decode(
            r#"object({
                name = string
                port = optional(number, 8080),
                tags = optional(map(string), { env = "dev" })
                tls  = optional(object({ enabled = optional(bool, false) }))
            })"#,
        );
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(
            ty.to_string(),
            "object({name = string, port = optional(number), tags = optional(map(string)), tls = optional(object({enabled = optional(bool)}))})"
        );
        let defaults = defaults.expect("defaults");
        assert_eq!(defaults.defaults["port"], serde_json::json!(8080));
        assert_eq!(defaults.defaults["tags"], serde_json::json!({"env": "dev"}));
        assert_eq!(
            defaults.paths(),
            vec!["port".to_string(), "tags".to_string(), "tls.enabled".to_string()]
        );
    }

    #[test]
    fn test_sf006_list_element_defaults() {
        let (_, defaults, diags) = decode("list(object({ a = optional(string, \"x\") }))");
        assert!(diags.is_empty());
        assert_eq!(defaults.unwrap().paths(), vec!["*.a".to_string()]);
    }

    #[test]
    fn test_sf006_bad_default_is_reported() {
        let (ty, defaults, diags) = decode("object({ port = optional(number, \"eighty\") })");
        assert_eq!(ty, Type::Any);
        assert!(defaults.is_none());
        assert_eq!(diags.len(), 1);
        let diag = diags.iter().next().unwrap();
        assert_eq!(diag.summary, "Invalid type specification");
        assert!(diag.detail.contains("invalid default value"));
        assert_eq!(diag.subject, Some(range()));
    }

    #[test]
    fn test_sf006_syntax_errors() {
        for expr in [
            "strin",
            "list(string",
            "list(string))",
            "optional(string)",
            "tuple(string)",
            "object({ a = string, a = number })",
            "string @",
            "",
        ] {
            let (ty, _, diags) = decode(expr);
            assert!(diags.has_errors(), "expected error for {:?}", expr);
            assert_eq!(ty, Type::Any);
        }
    }

    #[test]
    fn test_sf006_deep_nesting_is_rejected() {
        let deep_type = format!("{}string{}", "list(".repeat(5000), ")".repeat(5000));
        let deep_default = format!(
            "object({{ a = optional(any, {}{}) }})",
            "[".repeat(5000),
            "]".repeat(5000)
        );
        for expr in [deep_type, deep_default] {
            let (ty, defaults, diags) = decode(&expr);
            assert_eq!(ty, Type::Any);
            assert!(defaults.is_none());
            assert_eq!(diags.len(), 1);
            let diag = diags.iter().next().unwrap();
            assert_eq!(diag.summary, "Invalid type specification");
            assert!(diag.detail.contains("nested too deeply"), "{}", diag.detail);
        }
    }

    #[test]
    fn test_sf006_moderate_nesting_is_accepted() {
        let expr = format!("{}string{}", "list(".repeat(30), ")".repeat(30));
        let (ty, _, diags) = decode(&expr);
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(ty.to_string(), expr);
    }

    #[test]
    fn test_sf006_providerconfig_unknown_local_name() {
        let (_, _, diags) = decode("providerconfig(aws)");
        let diag = diags.iter().next().unwrap();
        assert_eq!(diag.summary, "Unknown provider local name");
        assert!(diag.detail.contains("\"aws\""));
    }

    #[test]
    fn test_sf006_providerconfig_sets_once() {
        let mut info = FakeInfo::with_provider("aws", "hashicorp/aws");
        let (first, _, d1) = type_constraint("providerconfig(aws)", &range(), &mut info);
        let (second, _, d2) = type_constraint("list(providerconfig(aws))", &range(), &mut info);
        assert!(d1.is_empty() && d2.is_empty());
        assert_eq!(info.sets, 1);
        assert_eq!(second, Type::List(Box::new(first.clone())));
        assert_eq!(first.to_string(), "providerconfig(registry.stackform.io/hashicorp/aws)");
    }

    #[test]
    fn test_sf006_provider_config_identity() {
        let addr = ProviderAddr::parse("hashicorp/aws").unwrap();
        let a = ProviderConfigType::new(addr.clone());
        let b = ProviderConfigType::new(addr);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
