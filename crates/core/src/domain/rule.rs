use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RULE_PRIORITY: i64 = 10;
pub const DEFAULT_ACTION_LIMIT: u32 = 4;
pub const DEFAULT_LIST_LIMIT: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub i64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `taxonomy:slug` identifier of one taxonomy-term assignment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionKey(pub String);

impl ConditionKey {
    pub fn new(taxonomy: &str, slug: &str) -> Self {
        Self(format!("{taxonomy}:{slug}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Enabled,
    Disabled,
}

impl RuleStatus {
    pub fn from_flag(flag: i64) -> Self {
        if flag != 0 {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }

    pub fn as_flag(&self) -> i64 {
        match self {
            Self::Enabled => 1,
            Self::Disabled => 0,
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Self::Enabled => Self::Disabled,
            Self::Disabled => Self::Enabled,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    /// Lower value wins.
    pub priority: i64,
    pub status: RuleStatus,
    /// `None` inherits the engine-wide default.
    pub exclude_outofstock: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn is_enabled(&self) -> bool {
        self.status == RuleStatus::Enabled
    }
}

/// Input for creating a rule. Passed through [`RuleDraft::sanitized`] before storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleDraft {
    pub name: String,
    pub priority: i64,
    pub status: RuleStatus,
    pub exclude_outofstock: Option<bool>,
}

impl RuleDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: DEFAULT_RULE_PRIORITY,
            status: RuleStatus::Enabled,
            exclude_outofstock: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: RuleStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_exclude_outofstock(mut self, exclude: bool) -> Self {
        self.exclude_outofstock = Some(exclude);
        self
    }

    pub fn sanitized(self) -> Self {
        Self {
            name: sanitize_text(&self.name),
            priority: sanitize_priority(self.priority),
            status: self.status,
            exclude_outofstock: self.exclude_outofstock,
        }
    }
}

/// Partial update of a rule's own fields. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RulePatch {
    pub name: Option<String>,
    pub priority: Option<i64>,
    pub status: Option<RuleStatus>,
    pub exclude_outofstock: Option<Option<bool>>,
}

impl RulePatch {
    pub fn status(status: RuleStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn sanitized(self) -> Self {
        Self {
            name: self.name.map(|name| sanitize_text(&name)),
            priority: self.priority.map(sanitize_priority),
            status: self.status,
            exclude_outofstock: self.exclude_outofstock,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.exclude_outofstock.is_none()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrderColumn {
    Id,
    Name,
    #[default]
    Priority,
    Status,
    CreatedAt,
    UpdatedAt,
}

impl RuleOrderColumn {
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "id" => Self::Id,
            "name" => Self::Name,
            "status" => Self::Status,
            "created_at" => Self::CreatedAt,
            "updated_at" => Self::UpdatedAt,
            _ => Self::Priority,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Priority => "priority",
            Self::Status => "status",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleQuery {
    pub status: Option<RuleStatus>,
    pub order_by: RuleOrderColumn,
    pub descending: bool,
    pub limit: u32,
    pub offset: u32,
}

impl Default for RuleQuery {
    fn default() -> Self {
        Self {
            status: None,
            order_by: RuleOrderColumn::Priority,
            descending: false,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl RuleQuery {
    pub fn enabled() -> Self {
        Self { status: Some(RuleStatus::Enabled), limit: u32::MAX, ..Self::default() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    #[default]
    Equals,
    NotEquals,
    Contains,
}

impl ConditionOperator {
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "not_equals" => Self::NotEquals,
            "contains" => Self::Contains,
            _ => Self::Equals,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub attribute: String,
    pub operator: ConditionOperator,
    pub value: String,
    pub include_children: bool,
}

impl Condition {
    pub fn equals(attribute: &str, value: &str) -> Self {
        Self {
            attribute: sanitize_key(attribute),
            operator: ConditionOperator::Equals,
            value: sanitize_text(value),
            include_children: false,
        }
    }

    pub fn including_children(mut self) -> Self {
        self.include_children = true;
        self
    }

    pub fn key(&self) -> ConditionKey {
        ConditionKey::new(&self.attribute, &self.value)
    }
}

/// Raw condition fields as they arrive from forms or imported JSON.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionDraft {
    #[serde(default)]
    pub attribute: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, deserialize_with = "flag_from_any")]
    pub include_children: bool,
}

impl ConditionDraft {
    pub fn into_condition(self) -> Condition {
        Condition {
            attribute: sanitize_key(&self.attribute),
            operator: ConditionOperator::parse_or_default(&self.operator),
            value: sanitize_text(&self.value),
            include_children: self.include_children,
        }
    }
}

impl From<&Condition> for ConditionDraft {
    fn from(condition: &Condition) -> Self {
        Self {
            attribute: condition.attribute.clone(),
            operator: condition.operator.as_str().to_owned(),
            value: condition.value.clone(),
            include_children: condition.include_children,
        }
    }
}

/// Conditions combined by AND. A rule matches when any of its groups is satisfied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub group_id: u32,
    pub conditions: Vec<Condition>,
}

impl ConditionGroup {
    pub fn new(group_id: u32, conditions: Vec<Condition>) -> Self {
        Self { group_id, conditions }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    Rand,
    Date,
    Price,
    PriceDesc,
    Bestselling,
    Rating,
}

impl OrderBy {
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "date" => Self::Date,
            "price" => Self::Price,
            "price_desc" => Self::PriceDesc,
            "bestselling" => Self::Bestselling,
            "rating" => Self::Rating,
            _ => Self::Rand,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rand => "rand",
            Self::Date => "date",
            Self::Price => "price",
            Self::PriceDesc => "price_desc",
            Self::Bestselling => "bestselling",
            Self::Rating => "rating",
        }
    }
}

/// Where an action draws its recommendations from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionSource {
    Category { term: String, include_children: bool },
    Tag { term: String },
    /// Same term(s) the source product carries in `taxonomy`.
    Attribute { taxonomy: String },
    AttributeValue { taxonomy: String, term: String },
    Copurchase,
    Trending,
    RecentlyViewed,
    Similar,
}

impl ActionSource {
    /// Decodes the stored `(source, value)` pair. Unknown sources fall back to a category action.
    pub fn from_parts(source: &str, value: &str, include_children: bool) -> Self {
        let value = sanitize_text(value);
        match sanitize_key(source).as_str() {
            "tag" => Self::Tag { term: value },
            "attribute" => Self::Attribute { taxonomy: sanitize_key(&value) },
            "attribute_value" => {
                let (taxonomy, term) = value.split_once(':').unwrap_or((value.as_str(), ""));
                Self::AttributeValue { taxonomy: sanitize_key(taxonomy), term: term.to_owned() }
            }
            "copurchase" => Self::Copurchase,
            "trending" => Self::Trending,
            "recently_viewed" => Self::RecentlyViewed,
            "similar" => Self::Similar,
            _ => Self::Category { term: value, include_children },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Category { .. } => "category",
            Self::Tag { .. } => "tag",
            Self::Attribute { .. } => "attribute",
            Self::AttributeValue { .. } => "attribute_value",
            Self::Copurchase => "copurchase",
            Self::Trending => "trending",
            Self::RecentlyViewed => "recently_viewed",
            Self::Similar => "similar",
        }
    }

    /// Storage encoding of the variant payload.
    pub fn value(&self) -> String {
        match self {
            Self::Category { term, .. } | Self::Tag { term } => term.clone(),
            Self::Attribute { taxonomy } => taxonomy.clone(),
            Self::AttributeValue { taxonomy, term } => format!("{taxonomy}:{term}"),
            Self::Copurchase | Self::Trending | Self::RecentlyViewed | Self::Similar => {
                String::new()
            }
        }
    }

    pub fn include_children(&self) -> bool {
        matches!(self, Self::Category { include_children: true, .. })
    }

    pub fn category(term: &str) -> Self {
        Self::Category { term: sanitize_text(term), include_children: false }
    }

    pub fn tag(term: &str) -> Self {
        Self::Tag { term: sanitize_text(term) }
    }

    pub fn attribute_value(taxonomy: &str, term: &str) -> Self {
        Self::AttributeValue { taxonomy: sanitize_key(taxonomy), term: sanitize_text(term) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub source: ActionSource,
    pub limit: u32,
    pub orderby: OrderBy,
}

impl Action {
    pub fn new(source: ActionSource) -> Self {
        Self { source, limit: DEFAULT_ACTION_LIMIT, orderby: OrderBy::default() }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn with_orderby(mut self, orderby: OrderBy) -> Self {
        self.orderby = orderby;
        self
    }
}

/// Raw action fields as they arrive from forms or imported JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDraft {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_draft_limit", deserialize_with = "int_from_any")]
    pub limit: i64,
    #[serde(default)]
    pub orderby: String,
    #[serde(default, deserialize_with = "flag_from_any")]
    pub include_children: bool,
}

impl Default for ActionDraft {
    fn default() -> Self {
        Self {
            source: "category".to_owned(),
            value: String::new(),
            limit: default_draft_limit(),
            orderby: OrderBy::default().as_str().to_owned(),
            include_children: false,
        }
    }
}

impl ActionDraft {
    pub fn into_action(self) -> Action {
        let limit = u32::try_from(self.limit.unsigned_abs()).unwrap_or(u32::MAX).max(1);
        Action {
            source: ActionSource::from_parts(&self.source, &self.value, self.include_children),
            limit,
            orderby: OrderBy::parse_or_default(&self.orderby),
        }
    }
}

impl From<&Action> for ActionDraft {
    fn from(action: &Action) -> Self {
        Self {
            source: action.source.kind().to_owned(),
            value: action.source.value(),
            limit: i64::from(action.limit),
            orderby: action.orderby.as_str().to_owned(),
            include_children: action.source.include_children(),
        }
    }
}

/// Derived lookup row: a rule mentions this condition key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub condition_key: ConditionKey,
    pub rule_id: RuleId,
    pub priority: i64,
}

/// Lowercase identifier containing only `[a-z0-9_-]`.
pub fn sanitize_key(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-')
        .collect()
}

/// Single-line text: control characters dropped, whitespace collapsed, trimmed.
pub fn sanitize_text(raw: &str) -> String {
    raw.split(|ch: char| ch.is_whitespace() || ch.is_control())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn sanitize_priority(priority: i64) -> i64 {
    priority.checked_abs().unwrap_or(i64::MAX)
}

fn default_draft_limit() -> i64 {
    i64::from(DEFAULT_ACTION_LIMIT)
}

fn flag_from_any<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(flag) => flag,
        serde_json::Value::Number(number) => number.as_i64().map(|n| n != 0).unwrap_or(false),
        serde_json::Value::String(text) => {
            matches!(text.trim(), "1" | "true" | "yes" | "on")
        }
        _ => false,
    })
}

fn int_from_any<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(loose_int(&value).unwrap_or_else(default_draft_limit))
}

/// Reads an integer that may arrive as a JSON number or a numeric string.
pub(crate) fn loose_int(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(number) => number.as_i64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
