use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

pub const FRAGMENTS_TABLE: &str = "fragments";
pub const META_TABLE: &str = "meta";

pub const META_EMBEDDER_ID: &str = "embedder_id";
pub const META_DIM: &str = "dim";
pub const META_FRAGMENT_COUNT: &str = "fragment_count";
pub const META_CREATED_AT: &str = "created_at";

pub fn build_fragments_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("idx", DataType::Int64, false),
        Field::new("start", DataType::Int64, false),
        Field::new("end", DataType::Int64, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim),
            true,
        ),
    ]))
}

/// Key/value table describing how the fragments were embedded.
pub fn build_meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}
