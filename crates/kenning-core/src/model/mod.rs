//! Data Model
//!
//! Entries (the unit of indexing), search/retrieval queries, and ranked
//! result sets. All public types serialize with camelCase field names.

mod entry;
mod query;
mod result;

pub use entry::{ChangeType, ContentChange, Difficulty, Entry, EntryMetadata, EntryType, Scope};
pub use query::{
    DateRange, QueryContext, QueryType, RetrievalQuery, SearchFilters, SearchQuery, SearchWeights,
    UserFeedback,
};
pub use result::{
    FacetBucket, MatchedField, RankerUsed, RelevanceFactors, RetrievalResult, RetrievalTimings,
    SearchFacets, SearchResultItem, SearchResults, Snippet,
};
