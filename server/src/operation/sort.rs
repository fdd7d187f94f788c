use mongodb::bson::{Bson, Document};

/// The only field the resolver will cast before sorting.
pub const COERCIBLE_SORT_FIELD: &str = "timestamp";

/// Helper field holding the casted value on the aggregation path.
pub const CAST_FIELD: &str = "_sortTimestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

/// Canonicalizes a client-supplied direction. Only `-1` and `"-1"` mean
/// descending; everything else, recognized or not, sorts ascending.
pub fn coerce_sort(value: &Bson) -> SortDirection {
    match value {
        Bson::Int32(-1) | Bson::Int64(-1) => SortDirection::Descending,
        Bson::Double(n) if *n == -1.0 => SortDirection::Descending,
        Bson::String(s) if s == "-1" => SortDirection::Descending,
        _ => SortDirection::Ascending,
    }
}

/// Ordered field -> direction mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec(Vec<(String, SortDirection)>);

impl SortSpec {
    pub fn from_document(raw: &Document) -> Self {
        Self(
            raw.iter()
                .map(|(field, direction)| (field.clone(), coerce_sort(direction)))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn direction_of(&self, field: &str) -> Option<SortDirection> {
        self.0
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, direction)| *direction)
    }

    pub fn to_document(&self) -> Document {
        self.0
            .iter()
            .map(|(field, direction)| (field.clone(), Bson::Int32(direction.as_i32())))
            .collect()
    }

    /// Same ordering with `from` renamed to `to`.
    pub fn to_document_renaming(&self, from: &str, to: &str) -> Document {
        self.0
            .iter()
            .map(|(field, direction)| {
                let name = if field == from { to } else { field.as_str() };
                (name.to_string(), Bson::Int32(direction.as_i32()))
            })
            .collect()
    }
}

/// How a find-many sort gets executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortPlan {
    /// Plain cursor sort.
    Native(SortSpec),
    /// `field` must be cast to a date first, which needs an aggregation pipeline.
    Coerced {
        field: String,
        direction: SortDirection,
        spec: SortSpec,
    },
}

pub fn resolve(spec: &SortSpec, timestamp_as_date: bool) -> SortPlan {
    if timestamp_as_date {
        if let Some(direction) = spec.direction_of(COERCIBLE_SORT_FIELD) {
            return SortPlan::Coerced {
                field: COERCIBLE_SORT_FIELD.to_string(),
                direction,
                spec: spec.clone(),
            };
        }
    }
    SortPlan::Native(spec.clone())
}
