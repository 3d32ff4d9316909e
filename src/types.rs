/// Unique record identifier (join key across record and category tables).
/// Example: `post_000123`
pub type RecordId = String;
/// Display name of a category within a family schema.
/// Examples: `joy`, `public safety`
pub type CategoryName = String;
/// Raw source label used to derive a record's source type.
/// Examples: `@city_desk`, `Evening Herald`
pub type SourceLabel = String;
/// Internal identifier of a model predictor (always a valid identifier).
/// Examples: `joy`, `public_safety`, `public_safety_2`, `emotion_pc1`
pub type PredictorId = String;
/// Tag identifying which outcome variant a tidy result row belongs to.
/// Examples: `composite`, `views`, `likes`
pub type OutcomeTag = String;
