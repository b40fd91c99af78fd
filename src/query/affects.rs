//! Dotted `affects` expressions carried by modifiers.
//!
//! Tokens appear in a fixed order: optional `self`, optional domain
//! (`entries` or `forces`), optional `recursive`, an optional filter (an id
//! or type name), and a trailing selector. The default selector, `entries`,
//! is never written. Parsing and formatting are exact inverses for every
//! query [`AffectsQuery::new`] accepts.

use std::fmt;
use std::str::FromStr;

const SELF_TOKEN: &str = "self";
const RECURSIVE_TOKEN: &str = "recursive";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AffectsError {
    #[error("empty token in affects expression '{0}'")]
    EmptyToken(String),
    #[error("filter '{0}' collides with a reserved affects keyword")]
    ReservedFilter(String),
    #[error("filter '{0}' must not contain '.'")]
    DottedFilter(String),
    #[error("unexpected token '{token}' in affects expression '{expression}'")]
    UnexpectedToken { token: String, expression: String },
}

/// What the expression walks over.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AffectsDomain {
    Entries,
    Forces,
}

impl AffectsDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            AffectsDomain::Entries => "entries",
            AffectsDomain::Forces => "forces",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "entries" => Some(AffectsDomain::Entries),
            "forces" => Some(AffectsDomain::Forces),
            _ => None,
        }
    }
}

/// What the modifier changes on each matched node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum AffectsSelector {
    #[default]
    Entries,
    Profiles,
    Rules,
    Categories,
    Costs,
}

impl AffectsSelector {
    pub fn as_str(self) -> &'static str {
        match self {
            AffectsSelector::Entries => "entries",
            AffectsSelector::Profiles => "profiles",
            AffectsSelector::Rules => "rules",
            AffectsSelector::Categories => "categories",
            AffectsSelector::Costs => "costs",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "entries" => Some(AffectsSelector::Entries),
            "profiles" => Some(AffectsSelector::Profiles),
            "rules" => Some(AffectsSelector::Rules),
            "categories" => Some(AffectsSelector::Categories),
            "costs" => Some(AffectsSelector::Costs),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
/// Parsed `affects` expression.
pub struct AffectsQuery {
    self_scope: bool,
    domain: Option<AffectsDomain>,
    recursive: bool,
    filter: Option<String>,
    selector: AffectsSelector,
}

impl AffectsQuery {
    /// Build a query; filters may not reuse a keyword or contain a dot.
    pub fn new(
        self_scope: bool,
        domain: Option<AffectsDomain>,
        recursive: bool,
        filter: Option<String>,
        selector: AffectsSelector,
    ) -> Result<Self, AffectsError> {
        if let Some(filter) = &filter {
            validate_filter(filter)?;
        }
        Ok(Self {
            self_scope,
            domain,
            recursive,
            filter,
            selector,
        })
    }

    pub fn self_scope(&self) -> bool {
        self.self_scope
    }

    pub fn domain(&self) -> Option<AffectsDomain> {
        self.domain
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn selector(&self) -> AffectsSelector {
        self.selector
    }

    /// Parse a dotted expression; the empty string is the default query.
    pub fn parse(expression: &str) -> Result<Self, AffectsError> {
        let mut query = AffectsQuery::default();
        if expression.is_empty() {
            return Ok(query);
        }
        let tokens: Vec<&str> = expression.split('.').collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(AffectsError::EmptyToken(expression.to_string()));
        }
        let mut rest = tokens.as_slice();
        if let [SELF_TOKEN, tail @ ..] = rest {
            query.self_scope = true;
            rest = tail;
        }
        if let Some((first, tail)) = rest.split_first() {
            if let Some(domain) = AffectsDomain::parse(first) {
                query.domain = Some(domain);
                rest = tail;
            }
        }
        if let [RECURSIVE_TOKEN, tail @ ..] = rest {
            query.recursive = true;
            rest = tail;
        }
        let unexpected = |token: &str| AffectsError::UnexpectedToken {
            token: token.to_string(),
            expression: expression.to_string(),
        };
        match rest {
            [] => {}
            [last] => match AffectsSelector::parse(last) {
                Some(selector) => query.selector = selector,
                None => {
                    validate_filter(last).map_err(|_| unexpected(last))?;
                    query.filter = Some((*last).to_string());
                }
            },
            [filter, last] => {
                let selector = AffectsSelector::parse(last).ok_or_else(|| unexpected(last))?;
                validate_filter(filter).map_err(|_| unexpected(filter))?;
                query.filter = Some((*filter).to_string());
                query.selector = selector;
            }
            [_, _, extra, ..] => return Err(unexpected(extra)),
        }
        Ok(query)
    }
}

impl fmt::Display for AffectsQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<&str> = Vec::new();
        if self.self_scope {
            tokens.push(SELF_TOKEN);
        }
        if let Some(domain) = self.domain {
            tokens.push(domain.as_str());
        }
        if self.recursive {
            tokens.push(RECURSIVE_TOKEN);
        }
        if let Some(filter) = &self.filter {
            tokens.push(filter);
        }
        if self.selector != AffectsSelector::Entries {
            tokens.push(self.selector.as_str());
        }
        f.write_str(&tokens.join("."))
    }
}

impl FromStr for AffectsQuery {
    type Err = AffectsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AffectsQuery::parse(s)
    }
}

fn validate_filter(filter: &str) -> Result<(), AffectsError> {
    if filter.is_empty() {
        return Err(AffectsError::EmptyToken(filter.to_string()));
    }
    if filter.contains('.') {
        return Err(AffectsError::DottedFilter(filter.to_string()));
    }
    let reserved = filter == SELF_TOKEN
        || filter == RECURSIVE_TOKEN
        || AffectsDomain::parse(filter).is_some()
        || AffectsSelector::parse(filter).is_some();
    if reserved {
        return Err(AffectsError::ReservedFilter(filter.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting_and_parsing_are_inverse() {
        let domains = [None, Some(AffectsDomain::Entries), Some(AffectsDomain::Forces)];
        let selectors = [
            AffectsSelector::Entries,
            AffectsSelector::Profiles,
            AffectsSelector::Rules,
            AffectsSelector::Categories,
            AffectsSelector::Costs,
        ];
        for self_scope in [false, true] {
            for domain in domains {
                for recursive in [false, true] {
                    for filter in [None, Some("unit".to_string())] {
                        for selector in selectors {
                            let query = AffectsQuery::new(
                                self_scope,
                                domain,
                                recursive,
                                filter.clone(),
                                selector,
                            )
                            .unwrap();
                            let text = query.to_string();
                            assert_eq!(AffectsQuery::parse(&text).unwrap(), query, "{text}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn default_selector_is_elided() {
        let query = AffectsQuery::new(
            true,
            Some(AffectsDomain::Entries),
            true,
            Some("abc-1".into()),
            AffectsSelector::Entries,
        )
        .unwrap();
        assert_eq!(query.to_string(), "self.entries.recursive.abc-1");
        assert_eq!(AffectsQuery::default().to_string(), "");
    }

    #[test]
    fn reserved_filters_and_bad_shapes_are_rejected() {
        assert_eq!(
            AffectsQuery::new(false, None, false, Some("rules".into()), AffectsSelector::Entries),
            Err(AffectsError::ReservedFilter("rules".into()))
        );
        assert!(matches!(
            AffectsQuery::parse("self..rules"),
            Err(AffectsError::EmptyToken(_))
        ));
        assert!(matches!(
            AffectsQuery::parse("a.b.c"),
            Err(AffectsError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            AffectsQuery::parse("self.x.recursive"),
            Err(AffectsError::UnexpectedToken { .. })
        ));
    }
}
