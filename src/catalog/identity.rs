use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Handle of a node inside a [`Graph`](crate::Graph) arena.
///
/// Handles are never reused: removing a node leaves a tombstone so stale
/// handles resolve to `None` instead of aliasing a newer node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Memo key for a loaded catalogue: its id plus an optional book date.
///
/// Two loads of the same id pinned to different dates are distinct documents.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct CatalogueKey {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl CatalogueKey {
    pub fn new(id: impl Into<String>, date: Option<String>) -> Self {
        Self {
            id: id.into(),
            date,
        }
    }
}

impl fmt::Display for CatalogueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.date {
            Some(date) => write!(f, "{}@{}", self.id, date),
            None => f.write_str(&self.id),
        }
    }
}

/// Closed set of record kinds the engine types a normalized tree into.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NodeKind {
    GameSystem,
    Catalogue,
    Publication,
    CostType,
    ProfileType,
    CharacteristicType,
    Category,
    Force,
    Entry,
    Group,
    EntryLink,
    InfoLink,
    CategoryLink,
    CatalogueLink,
    Rule,
    Profile,
    InfoGroup,
    Characteristic,
    Cost,
    Constraint,
    Condition,
    ConditionGroup,
    Modifier,
    ModifierGroup,
    Repeat,
}

impl NodeKind {
    /// Element name used for this kind in the wrapped (XML) syntax.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::GameSystem => "gameSystem",
            NodeKind::Catalogue => "catalogue",
            NodeKind::Publication => "publication",
            NodeKind::CostType => "costType",
            NodeKind::ProfileType => "profileType",
            NodeKind::CharacteristicType => "characteristicType",
            NodeKind::Category => "categoryEntry",
            NodeKind::Force => "forceEntry",
            NodeKind::Entry => "selectionEntry",
            NodeKind::Group => "selectionEntryGroup",
            NodeKind::EntryLink => "entryLink",
            NodeKind::InfoLink => "infoLink",
            NodeKind::CategoryLink => "categoryLink",
            NodeKind::CatalogueLink => "catalogueLink",
            NodeKind::Rule => "rule",
            NodeKind::Profile => "profile",
            NodeKind::InfoGroup => "infoGroup",
            NodeKind::Characteristic => "characteristic",
            NodeKind::Cost => "cost",
            NodeKind::Constraint => "constraint",
            NodeKind::Condition => "condition",
            NodeKind::ConditionGroup => "conditionGroup",
            NodeKind::Modifier => "modifier",
            NodeKind::ModifierGroup => "modifierGroup",
            NodeKind::Repeat => "repeat",
        }
    }

    /// Root record key for the two document kinds.
    pub fn from_root_key(key: &str) -> Option<Self> {
        match key {
            "gameSystem" => Some(NodeKind::GameSystem),
            "catalogue" => Some(NodeKind::Catalogue),
            _ => None,
        }
    }

    pub fn is_root(self) -> bool {
        matches!(self, NodeKind::GameSystem | NodeKind::Catalogue)
    }

    pub fn is_link(self) -> bool {
        matches!(
            self,
            NodeKind::EntryLink
                | NodeKind::InfoLink
                | NodeKind::CategoryLink
                | NodeKind::CatalogueLink
        )
    }

    /// Kinds whose ids must be unique across a catalogue and its imports.
    pub fn requires_unique_id(self) -> bool {
        matches!(
            self,
            NodeKind::Entry
                | NodeKind::Group
                | NodeKind::Category
                | NodeKind::Force
                | NodeKind::Profile
                | NodeKind::Rule
                | NodeKind::InfoGroup
                | NodeKind::ProfileType
                | NodeKind::CostType
        )
    }

    /// Kinds that carry the query triple (scope, field, childId).
    pub fn is_query(self) -> bool {
        matches!(
            self,
            NodeKind::Constraint | NodeKind::Condition | NodeKind::Repeat
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// String-valued enums with a catch-all keep unknown tokens round-trippable.
macro_rules! token_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash)]
        pub enum $name {
            $($variant,)+
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $text,)+
                    $name::Other(value) => value.as_str(),
                }
            }

            pub fn parse(value: &str) -> Self {
                match value {
                    $($text => $name::$variant,)+
                    other => $name::Other(other.to_string()),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let value = String::deserialize(deserializer)?;
                Ok(Self::parse(&value))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

token_enum! {
    /// Bound type of a constraint.
    ConstraintKind {
        Min => "min",
        Max => "max",
        Exactly => "exactly",
    }
}

token_enum! {
    /// Comparison performed by a condition.
    ConditionKind {
        AtLeast => "atLeast",
        AtMost => "atMost",
        EqualTo => "equalTo",
        NotEqualTo => "notEqualTo",
        GreaterThan => "greaterThan",
        LessThan => "lessThan",
        InstanceOf => "instanceOf",
        NotInstanceOf => "notInstanceOf",
    }
}

token_enum! {
    /// Effect a modifier applies to its field.
    ModifierKind {
        Set => "set",
        Increment => "increment",
        Decrement => "decrement",
        Multiply => "multiply",
        Append => "append",
        Prepend => "prepend",
        Add => "add",
        Remove => "remove",
        SetPrimary => "set-primary",
        UnsetPrimary => "unset-primary",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_kind_round_trips_known_and_unknown() {
        let known = ConstraintKind::Exactly;
        let json = serde_json::to_string(&known).unwrap();
        assert_eq!(json, "\"exactly\"");
        let back: ConstraintKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, known);

        let parsed: ConstraintKind = serde_json::from_str("\"percent\"").unwrap();
        assert_eq!(parsed, ConstraintKind::Other("percent".to_string()));
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"percent\"");
    }

    #[test]
    fn modifier_kind_parses_hyphenated_tokens() {
        assert_eq!(ModifierKind::parse("set-primary"), ModifierKind::SetPrimary);
        assert_eq!(ModifierKind::parse("increment").as_str(), "increment");
    }

    #[test]
    fn catalogue_key_display_includes_date() {
        let key = CatalogueKey::new("cat-1", Some("2024-01-01".to_string()));
        assert_eq!(key.to_string(), "cat-1@2024-01-01");
        assert_eq!(CatalogueKey::new("gst", None).to_string(), "gst");
    }

    #[test]
    fn uniqueness_classes_exclude_links_and_queries() {
        assert!(NodeKind::Entry.requires_unique_id());
        assert!(NodeKind::Force.requires_unique_id());
        assert!(!NodeKind::EntryLink.requires_unique_id());
        assert!(!NodeKind::Modifier.requires_unique_id());
        assert!(!NodeKind::Condition.requires_unique_id());
    }
}
