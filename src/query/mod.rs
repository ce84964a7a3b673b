pub mod matcher;

pub use matcher::{compile, BrowserMatch, CandidatePatterns, Matcher, WildcardMatcher};
