//! Static rule catalog
//!
//! Every rule the engine can run is listed once in the `rule_catalog!` table below.
//! The table generates the `RuleId` enum, name lookup, the function table shared by
//! the calling thread and the workers, and the default registration entries.
//! Adding a rule without a function, namespace or metadata kind fails to compile.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::context::RuleFn;
use crate::error::RuleError;
use crate::library::{arrays, math, strings};
use crate::registry::RuleMetadataEntry;
use crate::types::MetaKind;

/// Rule namespace (one registry table per namespace)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Namespace {
    StringParsing,
    ArrayParsing,
    MathOperations,
}

impl Namespace {
    pub const ALL: &'static [Namespace] = &[
        Namespace::StringParsing,
        Namespace::ArrayParsing,
        Namespace::MathOperations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Namespace::StringParsing => "stringParsing",
            Namespace::ArrayParsing => "arrayParsing",
            Namespace::MathOperations => "mathOperations",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Namespace {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .iter()
            .copied()
            .find(|ns| ns.name() == s)
            .ok_or_else(|| RuleError::Registration(format!("Unknown namespace: {}", s)))
    }
}

macro_rules! rule_catalog {
    ($(
        $variant:ident {
            name: $name:literal,
            namespace: $ns:ident,
            run: $run:path,
            threadable: $threadable:literal,
            meta: $meta:ident,
            deps: [$($dep:ident),* $(,)?] $(,)?
        }
    ),+ $(,)?) => {
        /// Identifier of a registered rule
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum RuleId {
            $($variant,)+
        }

        impl RuleId {
            pub const ALL: &'static [RuleId] = &[$(RuleId::$variant,)+];

            /// Stable rule name used in configuration, logs and the CLI
            pub fn name(self) -> &'static str {
                match self {
                    $(RuleId::$variant => $name,)+
                }
            }

            pub fn namespace(self) -> Namespace {
                match self {
                    $(RuleId::$variant => Namespace::$ns,)+
                }
            }

            /// Kind of metadata the rule signature accepts
            pub fn meta_kind(self) -> MetaKind {
                match self {
                    $(RuleId::$variant => MetaKind::$meta,)+
                }
            }

            pub(crate) fn function(self) -> RuleFn {
                match self {
                    $(RuleId::$variant => $run as RuleFn,)+
                }
            }

            pub(crate) fn source_location(self) -> String {
                match self {
                    $(RuleId::$variant => stringify!($run).replace(' ', ""),)+
                }
            }

            /// Catalog metadata entry for this rule
            pub fn standard_entry(self) -> RuleMetadataEntry {
                match self {
                    $(RuleId::$variant => RuleMetadataEntry {
                        id: self,
                        source_location: self.source_location(),
                        threadable: $threadable,
                        dependencies: BTreeSet::from([$(RuleId::$dep),*]),
                    },)+
                }
            }
        }

        /// Default metadata entries for every catalog rule
        pub fn standard_entries() -> Vec<RuleMetadataEntry> {
            RuleId::ALL.iter().map(|id| id.standard_entry()).collect()
        }
    };
}

rule_catalog! {
    TrimWhitespace {
        name: "trimWhitespace",
        namespace: StringParsing,
        run: strings::trim_whitespace,
        threadable: true,
        meta: None,
        deps: [],
    },
    ToUpperCase {
        name: "toUpperCase",
        namespace: StringParsing,
        run: strings::to_upper_case,
        threadable: true,
        meta: None,
        deps: [],
    },
    ToLowerCase {
        name: "toLowerCase",
        namespace: StringParsing,
        run: strings::to_lower_case,
        threadable: true,
        meta: None,
        deps: [],
    },
    ReverseString {
        name: "reverseString",
        namespace: StringParsing,
        run: strings::reverse_string,
        threadable: true,
        meta: None,
        deps: [],
    },
    CountCharacters {
        name: "countCharacters",
        namespace: StringParsing,
        run: strings::count_characters,
        threadable: true,
        meta: None,
        deps: [],
    },
    SplitWords {
        name: "splitWords",
        namespace: StringParsing,
        run: strings::split_words,
        threadable: true,
        meta: None,
        deps: [],
    },
    CollapseWhitespace {
        name: "collapseWhitespace",
        namespace: StringParsing,
        run: strings::collapse_whitespace,
        threadable: true,
        meta: None,
        deps: [SplitWords, JoinArray],
    },
    WordCount {
        name: "wordCount",
        namespace: StringParsing,
        run: strings::word_count,
        threadable: true,
        meta: None,
        deps: [SplitWords, ArrayLength],
    },
    StripMatches {
        name: "stripMatches",
        namespace: StringParsing,
        run: strings::strip_matches,
        threadable: false,
        meta: Pattern,
        deps: [],
    },
    NormalizeValue {
        name: "normalizeValue",
        namespace: StringParsing,
        run: strings::normalize_value,
        threadable: true,
        meta: None,
        deps: [NormalizeArray],
    },
    ArrayLength {
        name: "arrayLength",
        namespace: ArrayParsing,
        run: arrays::array_length,
        threadable: true,
        meta: None,
        deps: [],
    },
    ReverseArray {
        name: "reverseArray",
        namespace: ArrayParsing,
        run: arrays::reverse_array,
        threadable: true,
        meta: None,
        deps: [],
    },
    FlattenArray {
        name: "flattenArray",
        namespace: ArrayParsing,
        run: arrays::flatten_array,
        threadable: true,
        meta: None,
        deps: [],
    },
    DedupeArray {
        name: "dedupeArray",
        namespace: ArrayParsing,
        run: arrays::dedupe_array,
        threadable: true,
        meta: None,
        deps: [],
    },
    SortArray {
        name: "sortArray",
        namespace: ArrayParsing,
        run: arrays::sort_array,
        threadable: true,
        meta: None,
        deps: [],
    },
    JoinArray {
        name: "joinArray",
        namespace: ArrayParsing,
        run: arrays::join_array,
        threadable: true,
        meta: Data,
        deps: [],
    },
    UniqueSorted {
        name: "uniqueSorted",
        namespace: ArrayParsing,
        run: arrays::unique_sorted,
        threadable: true,
        meta: None,
        deps: [DedupeArray, SortArray],
    },
    NormalizeArray {
        name: "normalizeArray",
        namespace: ArrayParsing,
        run: arrays::normalize_array,
        threadable: true,
        meta: None,
        deps: [NormalizeValue],
    },
    DeepFlatten {
        name: "deepFlatten",
        namespace: ArrayParsing,
        run: arrays::deep_flatten,
        threadable: true,
        meta: None,
        deps: [DeepFlatten],
    },
    Double {
        name: "double",
        namespace: MathOperations,
        run: math::double,
        threadable: true,
        meta: None,
        deps: [],
    },
    AddOne {
        name: "addOne",
        namespace: MathOperations,
        run: math::add_one,
        threadable: false,
        meta: None,
        deps: [],
    },
    Sum {
        name: "sum",
        namespace: MathOperations,
        run: math::sum,
        threadable: true,
        meta: None,
        deps: [],
    },
    Average {
        name: "average",
        namespace: MathOperations,
        run: math::average,
        threadable: true,
        meta: None,
        deps: [Sum, ArrayLength],
    },
    Clamp {
        name: "clamp",
        namespace: MathOperations,
        run: math::clamp,
        threadable: true,
        meta: Data,
        deps: [],
    },
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuleId {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleId::ALL
            .iter()
            .copied()
            .find(|id| id.name() == s)
            .ok_or_else(|| RuleError::not_found(s))
    }
}

impl Serialize for RuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for RuleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a comma separated pipeline such as `"double,addOne"`
pub fn parse_pipeline(list: &str) -> crate::error::Result<Vec<RuleId>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for id in RuleId::ALL {
            assert_eq!(id.name().parse::<RuleId>().unwrap(), *id);
        }
        assert!(matches!(
            "noSuchRule".parse::<RuleId>(),
            Err(RuleError::RuleNotFound(name)) if name == "noSuchRule"
        ));
    }

    #[test]
    fn test_names_are_unique() {
        let names: BTreeSet<&str> = RuleId::ALL.iter().map(|id| id.name()).collect();
        assert_eq!(names.len(), RuleId::ALL.len());
    }

    #[test]
    fn test_standard_entries_cover_catalog() {
        let entries = standard_entries();
        assert_eq!(entries.len(), RuleId::ALL.len());

        let add_one = entries.iter().find(|e| e.id == RuleId::AddOne).unwrap();
        assert!(!add_one.threadable);

        let average = entries.iter().find(|e| e.id == RuleId::Average).unwrap();
        assert!(average.dependencies.contains(&RuleId::Sum));
        assert!(average.dependencies.contains(&RuleId::ArrayLength));
        assert_eq!(average.source_location, "math::average");
    }

    #[test]
    fn test_pattern_rules_are_not_threadable_by_default() {
        for entry in standard_entries() {
            if entry.id.meta_kind() == MetaKind::Pattern {
                assert!(!entry.threadable, "{} takes a pattern", entry.id);
            }
        }
    }

    #[test]
    fn test_serde_uses_rule_names() {
        let json = serde_json::to_string(&RuleId::AddOne).unwrap();
        assert_eq!(json, "\"addOne\"");
        let id: RuleId = serde_json::from_str("\"uniqueSorted\"").unwrap();
        assert_eq!(id, RuleId::UniqueSorted);
    }

    #[test]
    fn test_parse_pipeline() {
        assert_eq!(
            parse_pipeline("double, addOne").unwrap(),
            vec![RuleId::Double, RuleId::AddOne]
        );
        assert!(parse_pipeline("").unwrap().is_empty());
        assert!(parse_pipeline("double,bogus").is_err());
    }
}
