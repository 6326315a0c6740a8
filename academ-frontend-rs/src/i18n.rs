use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

static PHRASES: LazyLock<Value> = LazyLock::new(|| {
    serde_json::from_str(include_str!("translations.json")).unwrap_or_else(|e| {
        log::error!("Failed to parse embedded phrase table: {e}");
        Value::Null
    })
});

/// The language the interface itself is shown in.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, tsify::Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "lowercase")]
pub enum AppLanguage {
    #[default]
    En,
    Km,
}

impl AppLanguage {
    pub fn code(&self) -> &'static str {
        match self {
            AppLanguage::En => "en",
            AppLanguage::Km => "km",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            AppLanguage::En => AppLanguage::Km,
            AppLanguage::Km => AppLanguage::En,
        }
    }
}

/// Resolves a dotted key such as `tools.game.title`. Unresolved keys, and keys
/// that land on a section instead of a phrase, come back unchanged.
pub fn lookup(language: AppLanguage, key: &str) -> String {
    key.split('.')
        .try_fold(&PHRASES[language.code()], |node, segment| node.get(segment))
        .and_then(Value::as_str)
        .unwrap_or(key)
        .to_string()
}

/// Like [`lookup`], then replaces each `{name}` placeholder with its value.
pub fn format(language: AppLanguage, key: &str, params: &[(&str, &str)]) -> String {
    params
        .iter()
        .fold(lookup(language, key), |phrase, (name, value)| {
            phrase.replace(&format!("{{{name}}}"), value)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_nested_keys_per_language() {
        assert_eq!(lookup(AppLanguage::En, "sidebar.chat"), "Tutor Chat");
        assert_eq!(lookup(AppLanguage::Km, "common.save"), "រក្សាទុក");
        assert_eq!(lookup(AppLanguage::En, "dashboard.stats.xp"), "Total XP");
    }

    #[test]
    fn missing_keys_fall_back_to_the_key() {
        assert_eq!(lookup(AppLanguage::En, "sidebar.nope"), "sidebar.nope");
        assert_eq!(lookup(AppLanguage::Km, "nope"), "nope");
        // a section is not a phrase
        assert_eq!(lookup(AppLanguage::En, "dashboard.stats"), "dashboard.stats");
    }

    #[test]
    fn substitutes_placeholders() {
        assert_eq!(
            format(
                AppLanguage::En,
                "tools.game.scoreResult",
                &[("score", "3"), ("total", "5")]
            ),
            "You scored 3 out of 5"
        );
        assert_eq!(
            format(AppLanguage::En, "tools.chat.placeholder", &[("lang", "French")]),
            "Type a message in French..."
        );
    }

    #[test]
    fn both_languages_carry_the_same_keys() {
        fn keys(prefix: &str, node: &Value, out: &mut Vec<String>) {
            match node {
                Value::Object(map) => {
                    for (k, v) in map {
                        let path = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        keys(&path, v, out);
                    }
                }
                _ => out.push(prefix.to_string()),
            }
        }
        let mut en = vec![];
        let mut km = vec![];
        keys("", &PHRASES["en"], &mut en);
        keys("", &PHRASES["km"], &mut km);
        en.sort();
        km.sort();
        assert!(!en.is_empty());
        assert_eq!(en, km);
    }

    #[test]
    fn toggling_flips_between_the_two_languages() {
        assert_eq!(AppLanguage::En.toggled(), AppLanguage::Km);
        assert_eq!(AppLanguage::Km.toggled(), AppLanguage::En);
    }
}
