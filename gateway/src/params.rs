use url::form_urlencoded;

pub const CHECKSUM: &str = "checksum";

/// Request parameters in the order the caller sent them.
///
/// Duplicated keys are kept: they are forwarded to backends verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    /// Decodes an `application/x-www-form-urlencoded` string.
    pub fn parse(raw: &str) -> Self {
        Params {
            pairs: form_urlencoded::parse(raw.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Params {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Like [`Params::get`] but treats whitespace-only values as absent.
    pub fn get_nonblank(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    /// Comma separated list value, with empty items dropped.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replaces every value of `key` with a single `value`, keeping the position
    /// of the first occurrence. Appends if the key is absent.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.pairs.iter().position(|(k, _)| k == key) {
            Some(first) => {
                self.pairs[first].1 = value;
                let mut index = 0;
                self.pairs.retain(|(k, _)| {
                    let keep = k != key || index == first;
                    index += 1;
                    keep
                });
            }
            None => self.pairs.push((key.to_string(), value)),
        }
    }

    pub fn without(&self, keys: &[&str]) -> Params {
        Params {
            pairs: self
                .pairs
                .iter()
                .filter(|(k, _)| !keys.contains(&k.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish()
    }
}

/// Removes the checksum pair from a raw parameter string, leaving every other
/// byte untouched. The checksum is computed over exactly this string.
pub fn strip_checksum(raw: &str) -> String {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| pair.split('=').next() != Some(CHECKSUM))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_lookup() {
        let params = Params::parse("meetingID=room+1&name=Daily%20sync&empty=&recordID=a,%20b,,c");

        assert_eq!(params.get("meetingID"), Some("room 1"));
        assert_eq!(params.get("name"), Some("Daily sync"));
        assert_eq!(params.get("empty"), Some(""));
        assert_eq!(params.get_nonblank("empty"), None);
        assert_eq!(params.get("missing"), None);
        assert_eq!(params.list("recordID"), vec!["a", "b", "c"]);
        assert!(params.list("missing").is_empty());
    }

    #[test]
    fn test_set_replaces_all_occurrences() {
        let mut params = Params::from_pairs([("duration", "0"), ("name", "x"), ("duration", "9")]);
        params.set("duration", "120");
        assert_eq!(params.to_query_string(), "duration=120&name=x");

        params.set("record", "true");
        assert_eq!(params.to_query_string(), "duration=120&name=x&record=true");
    }

    #[test]
    fn test_without_and_encoding() {
        let params = Params::from_pairs([
            ("meetingID", "a b&c"),
            ("checksum", "abc"),
            ("fullName", "Zoë"),
        ]);
        let forwarded = params.without(&[CHECKSUM]);
        assert_eq!(
            forwarded.to_query_string(),
            "meetingID=a+b%26c&fullName=Zo%C3%AB"
        );
    }

    #[test]
    fn test_strip_checksum() {
        assert_eq!(
            strip_checksum("meetingID=x&checksum=deadbeef&name=a+b"),
            "meetingID=x&name=a+b"
        );
        assert_eq!(strip_checksum("checksum=deadbeef"), "");
        assert_eq!(strip_checksum("meetingID=x"), "meetingID=x");
        assert_eq!(strip_checksum(""), "");
        // Keys that merely start with "checksum" are kept
        assert_eq!(strip_checksum("checksumish=1&checksum=2"), "checksumish=1");
    }
}
