//! Result columns a caller can request.

use parley_auth_bridge::{ParleyError, Result};

/// Columns used when a caller does not name any.
pub const DEFAULT_FIELDS: &str = "msgID,userID,userName,realName,channelID,threadTs,text,time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    MsgId,
    UserId,
    UserName,
    RealName,
    ChannelId,
    ThreadTs,
    Text,
    Time,
    Reactions,
    Cursor,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::MsgId,
        Field::UserId,
        Field::UserName,
        Field::RealName,
        Field::ChannelId,
        Field::ThreadTs,
        Field::Text,
        Field::Time,
        Field::Reactions,
        Field::Cursor,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::MsgId => "msgID",
            Field::UserId => "userID",
            Field::UserName => "userName",
            Field::RealName => "realName",
            Field::ChannelId => "channelID",
            Field::ThreadTs => "threadTs",
            Field::Text => "text",
            Field::Time => "time",
            Field::Reactions => "reactions",
            Field::Cursor => "cursor",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Field::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Ordered, de-duplicated field selection with O(1) membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    order: Vec<Field>,
    mask: u16,
}

impl FieldSet {
    pub fn all() -> Self {
        let mut set = Self::empty();
        for field in Field::ALL {
            set.push(field);
        }
        set
    }

    fn empty() -> Self {
        Self {
            order: Vec::new(),
            mask: 0,
        }
    }

    fn push(&mut self, field: Field) {
        if self.mask & field.bit() == 0 {
            self.mask |= field.bit();
            self.order.push(field);
        }
    }

    /// Parse a comma-separated list; `all` expands in place to every field.
    /// Unknown names are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut set = Self::empty();
        for name in raw.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name.eq_ignore_ascii_case("all") {
                for field in Field::ALL {
                    set.push(field);
                }
                continue;
            }
            let field = Field::parse(name).ok_or_else(|| {
                ParleyError::validation(
                    "fields",
                    format!(
                        "unknown field `{}`; known fields: {}, or all",
                        name,
                        Field::ALL.map(|f| f.name()).join(", ")
                    ),
                )
            })?;
            set.push(field);
        }
        if set.order.is_empty() {
            return Err(ParleyError::validation("fields", "at least one field is required"));
        }
        Ok(set)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.mask & field.bit() != 0
    }

    pub fn fields(&self) -> &[Field] {
        &self.order
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.order.iter().map(Field::name).collect()
    }

    /// Whether any author-derived column is requested.
    pub fn needs_author_names(&self) -> bool {
        self.contains(Field::UserName) || self.contains(Field::RealName)
    }
}
