//! Phone number intelligence.

use crate::models::{ModuleError, PartialResult, Query, QueryType};
use crate::modules::{encode_component, link_list, Module, ScanContext};
use crate::net::ProviderRequest;
use async_trait::async_trait;
use serde::Deserialize;

/// Calling codes: (code, ISO country, country name). Longest prefix wins.
const CALLING_CODES: &[(&str, &str, &str)] = &[
    ("1", "US", "United States / Canada"),
    ("7", "RU", "Russia / Kazakhstan"),
    ("20", "EG", "Egypt"),
    ("27", "ZA", "South Africa"),
    ("30", "GR", "Greece"),
    ("31", "NL", "Netherlands"),
    ("32", "BE", "Belgium"),
    ("33", "FR", "France"),
    ("34", "ES", "Spain"),
    ("39", "IT", "Italy"),
    ("40", "RO", "Romania"),
    ("41", "CH", "Switzerland"),
    ("44", "GB", "United Kingdom"),
    ("45", "DK", "Denmark"),
    ("46", "SE", "Sweden"),
    ("47", "NO", "Norway"),
    ("48", "PL", "Poland"),
    ("49", "DE", "Germany"),
    ("51", "PE", "Peru"),
    ("52", "MX", "Mexico"),
    ("54", "AR", "Argentina"),
    ("55", "BR", "Brazil"),
    ("56", "CL", "Chile"),
    ("57", "CO", "Colombia"),
    ("60", "MY", "Malaysia"),
    ("61", "AU", "Australia"),
    ("62", "ID", "Indonesia"),
    ("63", "PH", "Philippines"),
    ("64", "NZ", "New Zealand"),
    ("65", "SG", "Singapore"),
    ("66", "TH", "Thailand"),
    ("81", "JP", "Japan"),
    ("82", "KR", "South Korea"),
    ("84", "VN", "Vietnam"),
    ("86", "CN", "China"),
    ("90", "TR", "Turkey"),
    ("91", "IN", "India"),
    ("92", "PK", "Pakistan"),
    ("234", "NG", "Nigeria"),
    ("254", "KE", "Kenya"),
    ("351", "PT", "Portugal"),
    ("353", "IE", "Ireland"),
    ("358", "FI", "Finland"),
    ("380", "UA", "Ukraine"),
    ("852", "HK", "Hong Kong"),
    ("880", "BD", "Bangladesh"),
    ("886", "TW", "Taiwan"),
    ("966", "SA", "Saudi Arabia"),
    ("971", "AE", "United Arab Emirates"),
    ("972", "IL", "Israel"),
];

/// A number in international form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPhone {
    /// Digits only, including the calling code.
    pub digits: String,
    pub calling_code: Option<&'static str>,
    pub country: Option<&'static str>,
    pub country_name: Option<&'static str>,
}

impl ParsedPhone {
    pub fn e164(&self) -> String {
        format!("+{}", self.digits)
    }

    /// Subscriber number without the calling code.
    pub fn national(&self) -> &str {
        match self.calling_code {
            Some(code) => &self.digits[code.len()..],
            None => &self.digits,
        }
    }
}

/// Parse a number given with a `+` or `00` international prefix.
pub fn parse_phone(input: &str) -> Option<ParsedPhone> {
    let compact: String = input
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    let digits = compact
        .strip_prefix('+')
        .or_else(|| compact.strip_prefix("00"))?;

    if !(8..=15).contains(&digits.len()) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.starts_with('0') {
        return None;
    }

    let entry = CALLING_CODES
        .iter()
        .filter(|(code, _, _)| digits.starts_with(code))
        .max_by_key(|(code, _, _)| code.len());

    Some(ParsedPhone {
        digits: digits.to_string(),
        calling_code: entry.map(|e| e.0),
        country: entry.map(|e| e.1),
        country_name: entry.map(|e| e.2),
    })
}

fn parse_or_reject(module: &str, query: &Query) -> Result<ParsedPhone, ModuleError> {
    parse_phone(query.value()).ok_or_else(|| {
        ModuleError::invalid_target(
            module,
            "expected an international number such as +6281234567890",
        )
    })
}

/// Offline parsing plus investigation links.
pub struct PhoneParseModule;

#[async_trait]
impl Module for PhoneParseModule {
    fn name(&self) -> &'static str {
        "phone_parse"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Phone]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        ctx.checkpoint(self.name())?;
        let phone = parse_or_reject(self.name(), query)?;
        let e164 = phone.e164();
        let quoted = encode_component(&format!("\"{}\"", e164));

        let mut result = PartialResult::new(self.name(), 0.6)
            .with_field("phone.e164", e164.clone())
            .with_field("phone.national", phone.national());
        result.set_opt("phone.calling_code", phone.calling_code.map(|c| format!("+{}", c)));
        result.set_opt("country", phone.country);
        result.set_opt("country_name", phone.country_name);
        if phone.country.is_none() {
            result.warn("calling code not recognized");
        }

        result.set(
            "links.messaging",
            link_list(&[
                ("WhatsApp", format!("https://wa.me/{}", phone.digits)),
                ("Telegram", format!("https://t.me/+{}", phone.digits)),
                ("Viber", format!("viber://chat?number=%2B{}", phone.digits)),
            ]),
        );
        result.set(
            "links.caller_id",
            link_list(&[
                ("Truecaller", format!("https://www.truecaller.com/search/global/{}", phone.digits)),
                ("Sync.me", format!("https://sync.me/search/?number={}", phone.digits)),
                ("CallerIDTest", format!("https://calleridtest.com/lookup?number={}", phone.digits)),
            ]),
        );
        result.set(
            "links.search",
            link_list(&[
                ("Google", format!("https://www.google.com/search?q={}", quoted)),
                ("Bing", format!("https://www.bing.com/search?q={}", quoted)),
                ("DuckDuckGo", format!("https://duckduckgo.com/?q={}", quoted)),
            ]),
        );

        if query.flag("deep") {
            result.set(
                "links.spam_reports",
                link_list(&[
                    ("ShouldIAnswer", format!("https://www.shouldianswer.com/phone-number/{}", phone.digits)),
                    ("Tellows", format!("https://www.tellows.com/num/{}", encode_component(&e164))),
                    ("WhoCalledMe", format!("https://whocalledme.com/PhoneNumber/{}", phone.national())),
                ]),
            );
            result.set(
                "links.social",
                link_list(&[
                    ("Facebook", format!("https://www.facebook.com/search/top?q={}", phone.digits)),
                    ("Google (social)", format!(
                        "https://www.google.com/search?q={}+site%3Afacebook.com+OR+site%3Alinkedin.com+OR+site%3Ainstagram.com",
                        quoted
                    )),
                ]),
            );
        }

        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct NumverifyResponse {
    #[serde(default)]
    valid: Option<bool>,
    #[serde(default)]
    international_format: Option<String>,
    #[serde(default)]
    local_format: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    carrier: Option<String>,
    #[serde(default)]
    line_type: Option<String>,
    #[serde(default)]
    error: Option<NumverifyError>,
}

#[derive(Debug, Deserialize)]
struct NumverifyError {
    code: u32,
    #[serde(default)]
    info: String,
}

/// Carrier and line type from the Numverify API.
pub struct NumverifyModule;

impl NumverifyModule {
    const ENDPOINT: &'static str = "http://apilayer.net/api/validate";
}

#[async_trait]
impl Module for NumverifyModule {
    fn name(&self) -> &'static str {
        "numverify"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Phone]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let phone = parse_or_reject(self.name(), query)?;
        let key = ctx.require_key(self.name(), "numverify")?;

        let request = ProviderRequest::get("numverify", Self::ENDPOINT)
            .query("access_key", key)
            .query("number", phone.digits.clone())
            .query("format", "1");
        let body: NumverifyResponse = ctx.fetch_json(self.name(), request).await?;

        if let Some(error) = body.error {
            // 101 invalid key, 102 inactive account, 104 quota, 106 rate limit
            return Err(match error.code {
                101 | 102 => ModuleError::auth_failure(self.name(), error.info),
                104 | 106 => ModuleError::rate_limited(self.name(), error.info),
                _ => ModuleError::unknown(self.name(), format!("numverify error {}: {}", error.code, error.info)),
            });
        }

        if body.valid != Some(true) {
            return Err(ModuleError::invalid_target(self.name(), "number is not valid"));
        }

        let mut result = PartialResult::new(self.name(), 0.9).with_field("phone.valid", true);
        result.set_text("phone.international", body.international_format.as_deref());
        result.set_text("phone.local", body.local_format.as_deref());
        result.set_text("country", body.country_code.as_deref());
        result.set_text("country_name", body.country_name.as_deref());
        result.set_text("phone.location", body.location.as_deref());
        result.set_text("phone.carrier", body.carrier.as_deref());
        result.set_text("phone.line_type", body.line_type.as_deref());

        Ok(result)
    }
}
