/// Caller-visible identity of a partial request, built from configured fields.
/// Example: `ORD-2041`, or `K;2025-03-01` when several key fields are joined.
pub type RequestKey = String;
/// Key under which allow-list placeholders are registered.
/// Example: `ORD-2041`
pub type UserKey = String;
/// Attribute name attached to a partial request.
/// Examples: `customer`, `currency`, `batch_date`
pub type AttributeKey = String;
/// Name of a configured record definition (`*` is the wildcard definition).
/// Examples: `HDR`, `TRL`, `*`
pub type RecordName = String;
/// Registered name of a field value converter.
/// Examples: `integer`, `decimal`, `boolean`, `text`
pub type TypeName = String;
/// Name stamped into index records to identify the producing builder.
/// Example: `inbox-splitter`
pub type BuilderName = String;
/// Literal token text before encoding.
/// Examples: `new`, `HDR`, `*`
pub type TokenText = String;
