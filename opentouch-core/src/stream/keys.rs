//! Symbolic key names sent by the browser client.
//!
//! Names follow the DOM `KeyboardEvent.key` vocabulary plus a few common
//! aliases. Lookup is case-insensitive for named keys; any other
//! single printable character maps to [`Key::Char`].

use std::fmt;

/// Platform-neutral non-character keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    // Whitespace and editing
    Enter,
    Tab,
    Space,
    Backspace,
    Delete,
    Insert,
    Escape,

    // Navigation
    Home,
    End,
    PageUp,
    PageDown,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,

    // Modifiers
    Shift,
    Control,
    Alt,
    Meta,
    CapsLock,

    // Function keys
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
}

/// A resolved key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Named(NamedKey),
    Char(char),
}

impl Key {
    /// Identity of the physical key: ASCII letters fold to lowercase, so
    /// `"a"` and `"A"` name the same held key.
    pub fn physical(self) -> Key {
        match self {
            Key::Char(c) => Key::Char(c.to_ascii_lowercase()),
            named => named,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Named(k) => write!(f, "{k:?}"),
            Key::Char(c) => write!(f, "{c:?}"),
        }
    }
}

/// Result of resolving a client key name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLookup {
    Found(Key),
    Unknown,
}

impl KeyLookup {
    pub fn found(self) -> Option<Key> {
        match self {
            KeyLookup::Found(k) => Some(k),
            KeyLookup::Unknown => None,
        }
    }
}

/// Resolve a `keydown` / `keyup` name.
pub fn resolve(name: &str) -> KeyLookup {
    if let Some(named) = named_key(name) {
        return KeyLookup::Found(Key::Named(named));
    }
    resolve_char(name)
}

/// Resolve a `keypress` payload: exactly one printable character.
pub fn resolve_char(s: &str) -> KeyLookup {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_control() => KeyLookup::Found(Key::Char(c)),
        _ => KeyLookup::Unknown,
    }
}

fn named_key(name: &str) -> Option<NamedKey> {
    use NamedKey::*;

    // The space bar arrives as a literal " " from the DOM.
    if name == " " {
        return Some(Space);
    }
    // Any other single character is a character key.
    if name.chars().nth(1).is_none() {
        return None;
    }

    let key = match name.to_ascii_lowercase().as_str() {
        "enter" | "return" => Enter,
        "tab" => Tab,
        "space" | "spacebar" => Space,
        "backspace" => Backspace,
        "delete" | "del" => Delete,
        "insert" | "ins" => Insert,
        "escape" | "esc" => Escape,

        "home" => Home,
        "end" => End,
        "pageup" | "pgup" => PageUp,
        "pagedown" | "pgdn" => PageDown,
        "arrowup" | "up" => ArrowUp,
        "arrowdown" | "down" => ArrowDown,
        "arrowleft" | "left" => ArrowLeft,
        "arrowright" | "right" => ArrowRight,

        "shift" => Shift,
        "control" | "ctrl" => Control,
        "alt" | "option" => Alt,
        "meta" | "cmd" | "command" | "win" | "super" | "os" => Meta,
        "capslock" => CapsLock,

        "f1" => F1,
        "f2" => F2,
        "f3" => F3,
        "f4" => F4,
        "f5" => F5,
        "f6" => F6,
        "f7" => F7,
        "f8" => F8,
        "f9" => F9,
        "f10" => F10,
        "f11" => F11,
        "f12" => F12,

        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_folds_ascii_case_only() {
        assert_eq!(Key::Char('A').physical(), Key::Char('a'));
        assert_eq!(Key::Char('7').physical(), Key::Char('7'));
        assert_eq!(Key::Char('É').physical(), Key::Char('É'));
        assert_eq!(
            Key::Named(NamedKey::Shift).physical(),
            Key::Named(NamedKey::Shift)
        );
    }

    #[test]
    fn named_keys_are_case_insensitive() {
        assert_eq!(resolve("Enter"), KeyLookup::Found(Key::Named(NamedKey::Enter)));
        assert_eq!(resolve("ENTER"), KeyLookup::Found(Key::Named(NamedKey::Enter)));
        assert_eq!(resolve("f11"), KeyLookup::Found(Key::Named(NamedKey::F11)));
    }

    #[test]
    fn aliases() {
        assert_eq!(resolve("esc"), resolve("Escape"));
        assert_eq!(resolve("Ctrl"), resolve("Control"));
        assert_eq!(resolve("cmd"), KeyLookup::Found(Key::Named(NamedKey::Meta)));
        assert_eq!(resolve("ArrowLeft"), resolve("left"));
        assert_eq!(resolve(" "), KeyLookup::Found(Key::Named(NamedKey::Space)));
    }

    #[test]
    fn single_characters_keep_case() {
        assert_eq!(resolve("a"), KeyLookup::Found(Key::Char('a')));
        assert_eq!(resolve("A"), KeyLookup::Found(Key::Char('A')));
        assert_eq!(resolve("é"), KeyLookup::Found(Key::Char('é')));
    }

    #[test]
    fn unknown_names() {
        assert_eq!(resolve("Hyper"), KeyLookup::Unknown);
        assert_eq!(resolve(""), KeyLookup::Unknown);
        assert_eq!(resolve("\u{7}"), KeyLookup::Unknown);
        assert_eq!(resolve("F13"), KeyLookup::Unknown);
    }

    #[test]
    fn keypress_only_accepts_characters() {
        assert_eq!(resolve_char("x"), KeyLookup::Found(Key::Char('x')));
        assert_eq!(resolve_char("Enter"), KeyLookup::Unknown);
        assert_eq!(resolve_char("\n"), KeyLookup::Unknown);
        assert_eq!(resolve_char("xy"), KeyLookup::Unknown);
    }
}
