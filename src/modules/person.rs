//! Person search: username candidates and search links for a full name.

use crate::models::{ModuleError, PartialResult, Query, QueryType};
use crate::modules::{encode_component, link_list, Module, ScanContext};
use async_trait::async_trait;

/// A cleaned-up personal name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonName {
    pub full: String,
    pub first: String,
    pub last: Option<String>,
}

/// Accept letters, spaces, apostrophes, dots and hyphens.
pub fn parse_name(input: &str) -> Option<PersonName> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let valid = parts.iter().all(|p| {
        p.chars()
            .all(|c| c.is_alphabetic() || matches!(c, '\'' | '.' | '-'))
    });
    if parts.is_empty() || !valid || parts.concat().chars().filter(|c| c.is_alphabetic()).count() < 2 {
        return None;
    }

    Some(PersonName {
        full: parts.join(" "),
        first: parts[0].to_string(),
        last: (parts.len() > 1).then(|| parts[parts.len() - 1].to_string()),
    })
}

/// Likely usernames for a name, in a stable order without duplicates.
pub fn username_candidates(name: &PersonName) -> Vec<String> {
    let clean = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect()
    };
    let first = clean(&name.first);

    let mut candidates = vec![first.clone()];
    if let Some(last) = name.last.as_deref().map(clean) {
        let initial: String = first.chars().take(1).collect();
        let last_initial: String = last.chars().take(1).collect();
        candidates.extend([
            format!("{}{}", first, last),
            format!("{}.{}", first, last),
            format!("{}_{}", first, last),
            format!("{}-{}", first, last),
            format!("{}{}", initial, last),
            format!("{}.{}", initial, last),
            format!("{}{}", first, last_initial),
            format!("{}{}", last, first),
            format!("{}.{}", last, first),
        ]);
    }

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| c.len() >= 2 && seen.insert(c.clone()));
    candidates
}

/// Builds search links and username candidates. Makes no provider calls.
pub struct PersonSearchModule;

#[async_trait]
impl Module for PersonSearchModule {
    fn name(&self) -> &'static str {
        "person_search"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Person]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        ctx.checkpoint(self.name())?;
        let name = parse_name(query.value())
            .ok_or_else(|| ModuleError::invalid_target(self.name(), "not a valid personal name"))?;
        let location = query.option("location").map(str::trim).filter(|l| !l.is_empty());

        let quoted = encode_component(&format!("\"{}\"", name.full));
        let with_location = match location {
            Some(loc) => format!("{}+{}", quoted, encode_component(loc)),
            None => quoted.clone(),
        };
        let plain = encode_component(&name.full);

        let mut result = PartialResult::new(self.name(), 0.5)
            .with_field("person.name", name.full.clone())
            .with_field("person.first_name", name.first.clone())
            .with_field("username_candidates", username_candidates(&name));
        result.set_opt("person.last_name", name.last.clone());
        result.set_opt("person.location", location);

        result.set(
            "links.search",
            link_list(&[
                ("Google", format!("https://www.google.com/search?q={}", with_location)),
                ("Bing", format!("https://www.bing.com/search?q={}", with_location)),
                ("DuckDuckGo", format!("https://duckduckgo.com/?q={}", with_location)),
            ]),
        );
        result.set(
            "links.social",
            link_list(&[
                ("Facebook", format!("https://www.facebook.com/search/people/?q={}", plain)),
                ("Twitter", format!("https://x.com/search?q={}&f=user", quoted)),
                ("Instagram", format!("https://www.google.com/search?q=site%3Ainstagram.com+{}", quoted)),
            ]),
        );
        result.set(
            "links.professional",
            link_list(&[
                ("LinkedIn", format!("https://www.linkedin.com/search/results/people/?keywords={}", plain)),
                ("GitHub", format!("https://github.com/search?q={}&type=users", plain)),
            ]),
        );

        if query.flag("deep") {
            let records_location = location.map(encode_component).unwrap_or_default();
            result.set(
                "links.records",
                link_list(&[
                    ("TruePeopleSearch", format!(
                        "https://www.truepeoplesearch.com/results?name={}&citystatezip={}",
                        plain, records_location
                    )),
                    ("FastPeopleSearch", format!(
                        "https://www.fastpeoplesearch.com/name/{}",
                        name.full.to_lowercase().replace(' ', "-")
                    )),
                    ("Whitepages", format!("https://www.whitepages.com/name/{}", plain)),
                ]),
            );
        }

        Ok(result)
    }
}
