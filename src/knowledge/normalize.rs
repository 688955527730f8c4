//! 标识符规范化：去掉波兰语变音符、转大写、去首尾空白
//!
//! 同一实体无论 LLM 或外部服务如何书写，都映射到同一个 key。

/// 波兰语字母到 ASCII 的固定映射
const DIACRITICS: &[(char, char)] = &[
    ('ą', 'a'),
    ('ć', 'c'),
    ('ę', 'e'),
    ('ł', 'l'),
    ('ń', 'n'),
    ('ó', 'o'),
    ('ś', 's'),
    ('ź', 'z'),
    ('ż', 'z'),
    ('Ą', 'A'),
    ('Ć', 'C'),
    ('Ę', 'E'),
    ('Ł', 'L'),
    ('Ń', 'N'),
    ('Ó', 'O'),
    ('Ś', 'S'),
    ('Ź', 'Z'),
    ('Ż', 'Z'),
];

fn fold_char(c: char) -> char {
    DIACRITICS
        .iter()
        .find(|(from, _)| *from == c)
        .map(|(_, to)| *to)
        .unwrap_or(c)
}

pub fn normalize(s: &str) -> String {
    s.trim()
        .chars()
        .map(fold_char)
        .collect::<String>()
        .to_uppercase()
}

/// 只保留第一个空白分隔的词（外部服务只接受名，不接受全名）
pub fn first_token(s: &str) -> String {
    let normalized = normalize(s);
    normalized
        .split_whitespace()
        .next()
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polish_letters() {
        assert_eq!(normalize("łukasz"), "LUKASZ");
        assert_eq!(normalize("  Józef "), "JOZEF");
        assert_eq!(normalize("Małgorzata"), "MALGORZATA");
        assert_eq!(normalize("KRAKÓW"), "KRAKOW");
        assert_eq!(normalize("Źdźbło"), "ZDZBLO");
    }

    #[test]
    fn test_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(first_token(""), "");
    }

    #[test]
    fn test_first_token() {
        assert_eq!(first_token("Barbara Zawadzka"), "BARBARA");
        assert_eq!(first_token("  aleksander ragowski "), "ALEKSANDER");
        assert_eq!(first_token("RAFAŁ"), "RAFAL");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "łukasz",
            "Warszawa ",
            "ÓŚĆ ąę",
            "already UPPER",
            "\tmixed Case łódź\n",
            "",
            "straße",
        ];
        for s in inputs {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "normalize not idempotent for {s:?}");
            let tok = first_token(s);
            assert_eq!(first_token(&tok), tok);
        }
    }
}
