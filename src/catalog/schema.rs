//! Static schema table shared by the format normalizer and the node model.
//!
//! One table answers every structural question the engine asks about a
//! record: which plural keys hold child collections, which singular element
//! wraps their items in the XML syntax, which node kind those items become,
//! which collections a given kind may own, and which scalar fields survive
//! serialization.

use crate::catalog::identity::NodeKind;

/// Container definition: plural key, singular XML wrapper, item kind.
#[derive(Clone, Copy, Debug)]
pub struct Container {
    pub key: &'static str,
    pub wrapper: &'static str,
    pub kind: NodeKind,
}

const fn container(key: &'static str, wrapper: &'static str, kind: NodeKind) -> Container {
    Container { key, wrapper, kind }
}

pub const CONTAINERS: &[Container] = &[
    container("publications", "publication", NodeKind::Publication),
    container("costTypes", "costType", NodeKind::CostType),
    container("profileTypes", "profileType", NodeKind::ProfileType),
    container("characteristicTypes", "characteristicType", NodeKind::CharacteristicType),
    container("categoryEntries", "categoryEntry", NodeKind::Category),
    container("forceEntries", "forceEntry", NodeKind::Force),
    container("selectionEntries", "selectionEntry", NodeKind::Entry),
    container("sharedSelectionEntries", "selectionEntry", NodeKind::Entry),
    container("selectionEntryGroups", "selectionEntryGroup", NodeKind::Group),
    container("sharedSelectionEntryGroups", "selectionEntryGroup", NodeKind::Group),
    container("entryLinks", "entryLink", NodeKind::EntryLink),
    container("infoLinks", "infoLink", NodeKind::InfoLink),
    container("categoryLinks", "categoryLink", NodeKind::CategoryLink),
    container("catalogueLinks", "catalogueLink", NodeKind::CatalogueLink),
    container("rules", "rule", NodeKind::Rule),
    container("sharedRules", "rule", NodeKind::Rule),
    container("profiles", "profile", NodeKind::Profile),
    container("sharedProfiles", "profile", NodeKind::Profile),
    container("infoGroups", "infoGroup", NodeKind::InfoGroup),
    container("sharedInfoGroups", "infoGroup", NodeKind::InfoGroup),
    container("characteristics", "characteristic", NodeKind::Characteristic),
    container("costs", "cost", NodeKind::Cost),
    container("constraints", "constraint", NodeKind::Constraint),
    container("conditions", "condition", NodeKind::Condition),
    container("conditionGroups", "conditionGroup", NodeKind::ConditionGroup),
    container("modifiers", "modifier", NodeKind::Modifier),
    container("modifierGroups", "modifierGroup", NodeKind::ModifierGroup),
    container("repeats", "repeat", NodeKind::Repeat),
];

/// Keys that always hold text content, normalized to a one-string array.
pub const TEXT_KEYS: &[&str] = &["description", "readme", "comment"];

/// Key holding an element's own text (e.g. a characteristic value).
pub const TEXT_CONTENT_KEY: &str = "$text";

/// Attributes that are references or labels and are never coerced to numbers.
pub const STRING_KEYS: &[&str] = &[
    "id",
    "name",
    "targetId",
    "childId",
    "typeId",
    "typeName",
    "field",
    "scope",
    "gameSystemId",
    "publicationId",
    "defaultSelectionEntryId",
    "categoryEntryId",
    "shortName",
    "affects",
];

/// Scalar fields kept when a node tree is written back to a record.
pub const SERIALIZED_FIELDS: &[&str] = &[
    "id",
    "name",
    "type",
    "subtype",
    "hidden",
    "comment",
    "description",
    "readme",
    "revision",
    "battleScribeVersion",
    "authorName",
    "authorContact",
    "authorUrl",
    "gameSystemId",
    "gameSystemRevision",
    "library",
    "targetId",
    "typeId",
    "typeName",
    "value",
    "field",
    "scope",
    "childId",
    "shared",
    "includeChildSelections",
    "includeChildForces",
    "percentValue",
    "repeats",
    "roundUp",
    "primary",
    "collective",
    "import",
    "importRootEntries",
    "defaultSelectionEntryId",
    "defaultAmount",
    "categoryEntryId",
    "publicationId",
    "page",
    "publisher",
    "publisherUrl",
    "publicationDate",
    "shortName",
    "defaultCostLimit",
    "affects",
    "join",
    TEXT_CONTENT_KEY,
];

const INFO_KEYS: &[&str] = &["profiles", "rules", "infoLinks", "infoGroups"];
const MODIFIER_KEYS: &[&str] = &["modifiers", "modifierGroups"];

/// Child collections a node of `kind` may own, in serialization order.
pub fn allowed_children(kind: NodeKind) -> &'static [&'static str] {
    match kind {
        NodeKind::GameSystem | NodeKind::Catalogue => &[
            "publications",
            "costTypes",
            "profileTypes",
            "categoryEntries",
            "forceEntries",
            "catalogueLinks",
            "selectionEntries",
            "entryLinks",
            "sharedSelectionEntries",
            "sharedSelectionEntryGroups",
            "sharedRules",
            "sharedProfiles",
            "sharedInfoGroups",
            "rules",
            "profiles",
            "infoLinks",
            "infoGroups",
        ],
        NodeKind::ProfileType => &["characteristicTypes"],
        NodeKind::Category => &[
            "constraints",
            "modifiers",
            "modifierGroups",
            "profiles",
            "rules",
            "infoLinks",
            "infoGroups",
        ],
        NodeKind::Force => &[
            "forceEntries",
            "categoryLinks",
            "constraints",
            "modifiers",
            "modifierGroups",
            "profiles",
            "rules",
            "infoLinks",
            "infoGroups",
        ],
        NodeKind::Entry | NodeKind::Group | NodeKind::EntryLink => &[
            "selectionEntries",
            "selectionEntryGroups",
            "entryLinks",
            "constraints",
            "modifiers",
            "modifierGroups",
            "profiles",
            "rules",
            "infoLinks",
            "infoGroups",
            "categoryLinks",
            "costs",
        ],
        NodeKind::CategoryLink => &["constraints", "modifiers", "modifierGroups"],
        NodeKind::InfoLink | NodeKind::Rule => MODIFIER_KEYS,
        NodeKind::InfoGroup => &[
            "profiles",
            "rules",
            "infoLinks",
            "infoGroups",
            "modifiers",
            "modifierGroups",
        ],
        NodeKind::Profile => &["characteristics", "modifiers", "modifierGroups"],
        NodeKind::Modifier => &["conditions", "conditionGroups", "repeats"],
        NodeKind::ModifierGroup => &[
            "modifiers",
            "modifierGroups",
            "conditions",
            "conditionGroups",
            "repeats",
        ],
        NodeKind::ConditionGroup => &["conditions", "conditionGroups"],
        NodeKind::Publication
        | NodeKind::CostType
        | NodeKind::CharacteristicType
        | NodeKind::CatalogueLink
        | NodeKind::Characteristic
        | NodeKind::Cost
        | NodeKind::Constraint
        | NodeKind::Condition
        | NodeKind::Repeat => &[],
    }
}

/// Info collections (rules, profiles, info groups and info links).
pub fn info_keys() -> &'static [&'static str] {
    INFO_KEYS
}

pub fn container_for_key(key: &str) -> Option<&'static Container> {
    CONTAINERS.iter().find(|c| c.key == key)
}

/// Resolve the item kind of `key` when owned by `parent`; `None` strips it.
pub fn child_kind(parent: NodeKind, key: &str) -> Option<NodeKind> {
    if !allowed_children(parent).contains(&key) {
        return None;
    }
    container_for_key(key).map(|c| c.kind)
}

pub fn is_text_key(key: &str) -> bool {
    TEXT_KEYS.contains(&key)
}

pub fn is_string_key(key: &str) -> bool {
    STRING_KEYS.contains(&key)
}

pub fn is_serialized_field(key: &str) -> bool {
    SERIALIZED_FIELDS.contains(&key)
}

/// XML namespace emitted on the root element of each document kind.
pub fn root_namespace(kind: NodeKind) -> Option<&'static str> {
    match kind {
        NodeKind::GameSystem => Some("http://www.battlescribe.net/schema/gameSystemSchema"),
        NodeKind::Catalogue => Some("http://www.battlescribe.net/schema/catalogueSchema"),
        _ => None,
    }
}
