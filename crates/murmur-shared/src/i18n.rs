//! Localised strings for user-visible notices and system timeline entries.
//!
//! Lookups fall back to English when the active language lacks a key, and to
//! the key itself when no table has it.

use serde::{Deserialize, Serialize};

use crate::error::SharedError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ru,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::En, Language::Ru];

    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, SharedError> {
        match code.trim() {
            "en" => Ok(Language::En),
            "ru" => Ok(Language::Ru),
            other => Err(SharedError::UnknownLanguage(other.to_string())),
        }
    }

    fn table(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Language::En => EN,
            Language::Ru => RU,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

const EN: &[(&str, &str)] = &[
    ("chat.userJoined", "joined the chat"),
    ("chat.userLeft", "left the chat"),
    ("chat.online", "online"),
    ("chat.encrypted", "End-to-end encrypted"),
    ("errors.connectionFailed", "Failed to connect"),
    ("errors.invalidPassword", "Invalid room password"),
    ("errors.sendFailed", "Failed to send message"),
    ("errors.storageDegraded", "Could not save a key fingerprint; it will be retried"),
    ("security.keyMismatch", "Security Warning: Key fingerprint mismatch for"),
    ("security.expected", "Expected"),
    ("security.received", "Received"),
];

const RU: &[(&str, &str)] = &[
    ("chat.userJoined", "присоединился к чату"),
    ("chat.userLeft", "покинул чат"),
    ("chat.online", "онлайн"),
    ("chat.encrypted", "Сквозное шифрование"),
    ("errors.connectionFailed", "Не удалось подключиться"),
    ("errors.invalidPassword", "Неверный пароль комнаты"),
    ("errors.sendFailed", "Не удалось отправить сообщение"),
    (
        "security.keyMismatch",
        "Предупреждение безопасности: Несоответствие отпечатка ключа для",
    ),
    ("security.expected", "Ожидалось"),
    ("security.received", "Получено"),
];

fn lookup(table: &'static [(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Translate `key` into `lang`.
pub fn translate<'a>(lang: Language, key: &'a str) -> &'a str {
    lookup(lang.table(), key)
        .or_else(|| lookup(EN, key))
        .unwrap_or(key)
}
