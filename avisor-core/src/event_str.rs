//! The event-string mini-language: prefix and postfix parsing.
//!
//! A textual event specifier can encode per-subscription configuration
//! directly in the string. With the default configuration
//! (`?` divider, `,` item separator):
//!
//! - `"order.created?3"`: base event `order.created`, postfix token `3`
//!   handed to every matching postfix rule.
//! - `"!order.created"`: base event `order.created`, prefix `!` handed to
//!   its registered prefix callback.
//!
//! Postfix-derived options merge first, prefix-derived options on top, and
//! the subscriber's explicit options win over both at the `on` call site.

use crate::error::ConfigError;
use crate::value::Options;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Characters eligible for prefix registration, before the currently
/// reserved separators, divider and wildcard are subtracted.
const PREFIX_ALLOW_LIST: &str = "!@#$%^&+=~|:;<>-";

/// Result of parsing one textual event specifier.
#[derive(Debug, PartialEq)]
pub struct ParsedEvent {
    /// The base event name, stripped of prefix and postfix syntax.
    pub event: String,
    /// Options derived from matched prefix/postfix rules.
    pub options: Options,
}

type StrCallback = Arc<dyn Fn(&str) -> Options + Send + Sync>;

/// Parser for the event-string mini-language.
///
/// Rules are registered by plugins at install time; separators are fixed
/// for the life of the engine and validated against each other and against
/// the wildcard before any rule can be registered.
pub struct EventStrParser {
    ns_separator: char,
    divider: char,
    item_separator: char,
    postfix: Vec<(Regex, StrCallback)>,
    prefix: HashMap<char, StrCallback>,
}

impl EventStrParser {
    pub(crate) fn new(
        ns_separator: char,
        divider: char,
        item_separator: char,
    ) -> Result<Self, ConfigError> {
        let chars = [
            ("ns_separator", ns_separator),
            ("postfix_divider", divider),
            ("postfix_separator", item_separator),
        ];
        for (param, value) in chars {
            if super::event::WILDCARD.contains(value) {
                return Err(ConfigError::CharClash {
                    first: param,
                    second: "wildcard",
                    value,
                });
            }
        }
        for i in 0..chars.len() {
            for j in (i + 1)..chars.len() {
                if chars[i].1 == chars[j].1 {
                    return Err(ConfigError::CharClash {
                        first: chars[i].0,
                        second: chars[j].0,
                        value: chars[i].1,
                    });
                }
            }
        }
        Ok(Self {
            ns_separator,
            divider,
            item_separator,
            postfix: Vec::new(),
            prefix: HashMap::new(),
        })
    }

    /// Register a postfix rule: every postfix token is tested against
    /// `pattern`; on match, `f` receives the raw token and returns the
    /// options it derives.
    pub fn postfix<F>(&mut self, pattern: Regex, f: F)
    where
        F: Fn(&str) -> Options + Send + Sync + 'static,
    {
        self.postfix.push((pattern, Arc::new(f)));
    }

    /// Register a prefix rule for a single leading character.
    ///
    /// The character must come from the punctuation allow-list, must not be
    /// reserved by the separator/divider/wildcard configuration and must
    /// not already be registered.
    pub fn prefix<F>(&mut self, ch: char, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Options + Send + Sync + 'static,
    {
        if !PREFIX_ALLOW_LIST.contains(ch) || self.is_reserved(ch) {
            return Err(ConfigError::PrefixNotAllowed(ch));
        }
        if self.prefix.contains_key(&ch) {
            return Err(ConfigError::DuplicatePrefix(ch));
        }
        self.prefix.insert(ch, Arc::new(f));
        Ok(())
    }

    fn is_reserved(&self, ch: char) -> bool {
        ch == self.ns_separator
            || ch == self.divider
            || ch == self.item_separator
            || super::event::WILDCARD.contains(ch)
    }

    /// Split a raw event specifier into its base event and derived options.
    ///
    /// The divider part is stripped from the event name even when no
    /// postfix rule matches any token. Later postfix matches overwrite
    /// earlier ones on key collision; prefix-derived options win over all
    /// postfix-derived ones.
    pub fn parse(&self, raw: &str) -> ParsedEvent {
        let mut options = Options::new();
        let (mut event, postfix) = match raw.split_once(self.divider) {
            Some((event, postfix)) => (event.to_owned(), Some(postfix)),
            None => (raw.to_owned(), None),
        };
        if let Some(postfix) = postfix.filter(|p| !p.is_empty()) {
            for token in postfix.split(self.item_separator) {
                for (pattern, callback) in &self.postfix {
                    if pattern.is_match(token) {
                        options.extend(callback(token));
                    }
                }
            }
        }
        if let Some(first) = event.chars().next()
            && let Some(callback) = self.prefix.get(&first)
        {
            options.extend(callback(first.encode_utf8(&mut [0u8; 4])));
            event.remove(0);
        }
        ParsedEvent { event, options }
    }
}
