use std::collections::HashMap;
use std::sync::OnceLock;

/// Global localization state
static LOCALIZER: OnceLock<Localizer> = OnceLock::new();

/// Initialize the global localizer. Lookups initialize it on demand too, so this only fixes
/// the point where the environment is read.
pub fn init() {
    localizer();
}

fn localizer() -> &'static Localizer {
    LOCALIZER.get_or_init(Localizer::new)
}

/// Get a localized message by key
pub fn t(key: &str) -> String {
    localizer().get(key)
}

/// Get a localized message by key with arguments (simplified)
pub fn t_with_args(key: &str, args: &[(&str, &dyn std::fmt::Display)]) -> String {
    localizer().get_with_args(key, args)
}

/// Localization manager
#[derive(Debug)]
pub struct Localizer {
    messages: HashMap<String, String>,
    fallback: HashMap<String, String>,
}

const EN: &str = include_str!("../locales/en.ftl");
const NN: &str = include_str!("../locales/nn.ftl");

impl Localizer {
    fn new() -> Self {
        Self::for_language(&Self::detect_language())
    }

    fn for_language(language: &str) -> Self {
        let content = match language {
            "nn" => NN,
            _ => EN, // Default to English
        };
        Self {
            messages: parse_messages(content),
            fallback: parse_messages(EN),
        }
    }

    fn detect_language() -> String {
        // Check environment variables in order of preference
        let lang_vars = ["LC_ALL", "LC_MESSAGES", "LANG"];

        for var in &lang_vars {
            if let Ok(value) = std::env::var(var) {
                // "nn_NO.UTF-8" -> "nn"
                let locale_without_encoding = value.split('.').next().unwrap_or(&value);
                let lang_code = locale_without_encoding
                    .split(['_', '-'])
                    .next()
                    .unwrap_or(locale_without_encoding)
                    .to_lowercase();

                match lang_code.as_str() {
                    "nn" | "nno" => return "nn".to_string(),
                    "en" => return "en".to_string(),
                    _ => continue,
                }
            }
        }

        "en".to_string()
    }

    fn get(&self, key: &str) -> String {
        self.messages
            .get(key)
            .or_else(|| self.fallback.get(key))
            .cloned()
            .unwrap_or_else(|| {
                tracing::warn!("missing translation key: {key}");
                format!("MISSING: {key}")
            })
    }

    fn get_with_args(&self, key: &str, args: &[(&str, &dyn std::fmt::Display)]) -> String {
        let mut message = self.get(key);

        // Simple string replacement for {$var} patterns
        for (var_name, value) in args {
            let placeholder = format!("{{${var_name}}}");
            message = message.replace(&placeholder, &format!("{value}"));
        }

        message
    }
}

/// Parse simple `key = value` lines. `#` starts a comment line.
fn parse_messages(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(" = "))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

// Convenience macros for common usage patterns
#[macro_export]
macro_rules! t {
    ($key:expr) => {
        $crate::i18n::t($key)
    };
}

#[macro_export]
macro_rules! t_args {
    ($key:expr, $($name:expr => $value:expr),*) => {{
        let args: &[(&str, &dyn std::fmt::Display)] = &[
            $(
                ($name, &$value),
            )*
        ];
        $crate::i18n::t_with_args($key, args)
    }};
}
