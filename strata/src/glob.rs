//! Redis-style glob matching (`*`, `?`, `[...]`, `\` escapes), used where
//! keys are enumerated in-process instead of by `SCAN MATCH`.

pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    match_from(&pattern, &text)
}

fn match_from(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Position to resume from after the most recent `*`.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    star = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    }
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_p, star_t)) => {
                p = star_p + 1;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// Match `c` against the class starting at `pattern[start] == '['`.
/// Returns whether it matched and the index after the closing `]`, or
/// `None` for an unterminated class.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(pattern.get(i), Some('^') | Some('!'));
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        let current = pattern[i];
        if current == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        if current == '\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (lo, hi) = if current <= pattern[i + 2] {
                (current, pattern[i + 2])
            } else {
                (pattern[i + 2], current)
            };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= current == c;
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_and_wildcards() {
        assert!(glob_match("product:123", "product:123"));
        assert!(!glob_match("product:123", "product:1234"));
        assert!(glob_match("product:*", "product:123"));
        assert!(glob_match("product:*", "product:"));
        assert!(!glob_match("product:*", "vendor:1"));
        assert!(glob_match("*:12?", "product:123"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_character_classes() {
        assert!(glob_match("user:[0-9]", "user:7"));
        assert!(!glob_match("user:[0-9]", "user:x"));
        assert!(glob_match("user:[^0-9]", "user:x"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
    }

    #[test]
    fn test_escapes() {
        assert!(glob_match(r"literal\*", "literal*"));
        assert!(!glob_match(r"literal\*", "literalX"));
    }

    #[test]
    fn test_unterminated_class_never_matches() {
        assert!(!glob_match("user:[0-9", "user:1"));
    }
}
