//! Entity trait: a named kind with a typed identifier.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Into<i64>;

    /// Short, stable name used in errors ("user", "file", ...).
    const KIND: &'static str;
}
