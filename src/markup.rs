//! Helpers for the tag-like text markup the client renders
//!
//! The server emits `[b]..[/b]`, `[i]..[/i]`, `[color=name]..[/color]` and
//! `[code]..[/code]`; unknown tags render as literal text client-side so
//! nothing here needs escaping.

pub fn bold(text: &str) -> String {
    format!("[b]{text}[/b]")
}

pub fn italic(text: &str) -> String {
    format!("[i]{text}[/i]")
}

pub fn color(name: &str, text: &str) -> String {
    format!("[color={name}]{text}[/color]")
}

pub fn code(text: &str) -> String {
    format!("[code]{text}[/code]")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(bold("Alice"), "[b]Alice[/b]");
        assert_eq!(italic("waves"), "[i]waves[/i]");
        assert_eq!(color("red", "ouch"), "[color=red]ouch[/color]");
        assert_eq!(code("/help"), "[code]/help[/code]");
    }
}
