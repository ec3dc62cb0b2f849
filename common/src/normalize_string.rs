pub trait NormalizeString {
    /// Unix line endings, no trailing blanks on lines, exactly one final `\n`.
    fn normalize(&self) -> String;
}

impl NormalizeString for str {
    fn normalize(&self) -> String {
        let mut out = String::with_capacity(self.len() + 1);

        for line in self.lines() {
            out.push_str(line.trim_end_matches([' ', '\t', '\r']));
            out.push('\n');
        }
        while out.ends_with("\n\n") {
            out.pop();
        }
        if out.is_empty() {
            out.push('\n');
        }

        out
    }
}

impl NormalizeString for String {
    fn normalize(&self) -> String {
        self.as_str().normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::NormalizeString;

    #[test]
    fn normalize_line_endings() {
        assert_eq!("a\r\nb".normalize(), "a\nb\n");
        assert_eq!("a  \nb\n\n\n".normalize(), "a\nb\n");
        assert_eq!("".normalize(), "\n");
    }
}
