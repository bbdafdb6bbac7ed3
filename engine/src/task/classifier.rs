//! Input classification
//!
//! Decides whether raw text is a shell command, an LLM directive, or a
//! fragment that should be dropped, and enqueues the result.
//!
//! Rules, in order:
//! 1. Empty, whitespace-only or fence-only input is dropped.
//! 2. Input starting with `llm:` (after leading whitespace) is kept as is.
//! 3. Input that looks like a shell invocation is kept as a shell task.
//! 4. Anything else becomes `llm:` + input.
//!
//! # Shell heuristic
//!
//! Only the first whitespace-delimited token decides:
//! - an explicit path (`./x`, `../x`, `/x`, `~/x`) is a shell invocation
//! - a known executable name (`BUILTIN_EXECUTABLES` plus configured extras)
//!   is a shell invocation, except for names that double as everyday English
//!   words (`AMBIGUOUS_WORDS`: `find`, `make`, `sleep`, `go`, `diff`, ...).
//!   Those count only when they stand alone or at least one argument looks
//!   like shell syntax: a flag (`-x`), a bare number, or a token containing
//!   one of `/ . * | > < = ~ $ & ; " ' ``.
//!
//! Everything else is treated as natural language. So `sleep 5` and
//! `go build ./...` are shell, while `sleep on it` and `go build` are not.

use std::collections::HashSet;
use tracing::debug;

use super::{Task, LLM_MARKER};
use crate::store::Memory;

/// Executables recognised out of the box
const BUILTIN_EXECUTABLES: &[&str] = &[
    // Version control
    "git",
    // File operations
    "ls", "cat", "grep", "rg", "find", "head", "tail", "wc", "tree", "stat", "file", "pwd",
    "mkdir", "touch", "cp", "mv", "rm", "ln", "chmod", "tar", "diff", "less", "more",
    "basename", "dirname", "realpath", "readlink",
    // Text processing
    "sed", "awk", "cut", "sort", "uniq", "tee", "xargs", "jq",
    // System info
    "ps", "top", "df", "du", "uname", "uptime", "whoami", "id", "hostname", "free", "env",
    "printenv", "date", "which", "lsof", "nproc", "lscpu", "lsblk", "kill", "pkill",
    "systemctl", "journalctl", "man",
    // Network
    "ping", "curl", "wget", "netstat", "ss", "ip", "ifconfig", "dig", "nslookup", "host", "ssh",
    // Build tools and runtimes
    "cargo", "rustc", "npm", "npx", "yarn", "node", "make", "python", "python3", "pip", "pip3",
    "go", "docker", "kubectl",
    // Shells and utilities
    "echo", "printf", "sh", "bash", "zsh", "sleep", "test", "time", "watch", "wait", "yes",
    "true", "false",
];

/// Executable names that are also common English words
pub const AMBIGUOUS_WORDS: &[&str] = &[
    "find", "make", "sort", "cut", "head", "tail", "top", "touch", "date", "free", "which",
    "kill", "watch", "time", "test", "file", "man", "cat", "less", "more", "host", "ping",
    "wait", "sleep", "yes", "true", "false", "id", "tree", "go", "diff",
];

const SHELL_SYNTAX_CHARS: &[char] = &['/', '.', '*', '|', '>', '<', '=', '~', '$', '&', ';', '"', '\'', '`'];

/// Classifies raw input into tasks
#[derive(Debug, Clone)]
pub struct Classifier {
    executables: HashSet<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// Create a classifier with the built-in executable set
    pub fn new() -> Self {
        Self {
            executables: BUILTIN_EXECUTABLES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Create a classifier that also recognises `extra` executables
    pub fn with_extra_executables<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut classifier = Self::new();
        classifier
            .executables
            .extend(extra.into_iter().map(Into::into).filter(|s| !s.is_empty()));
        classifier
    }

    /// Classify raw input, or `None` when it should be dropped
    pub fn classify(&self, raw: &str) -> Option<Task> {
        if raw.trim().is_empty() || is_fence_only(raw) {
            return None;
        }

        let leading_trimmed = raw.trim_start();
        if leading_trimmed.starts_with(LLM_MARKER) {
            return Some(Task::parse(leading_trimmed));
        }

        if self.looks_like_shell(raw) {
            return Some(Task::shell(raw));
        }

        Some(Task::directive(raw))
    }

    /// Classify without the shell rule: anything not already an `llm:`
    /// directive is coerced into one.
    pub fn classify_as_directive(&self, raw: &str) -> Option<Task> {
        if raw.trim().is_empty() || is_fence_only(raw) {
            return None;
        }

        let leading_trimmed = raw.trim_start();
        if leading_trimmed.starts_with(LLM_MARKER) {
            Some(Task::parse(leading_trimmed))
        } else {
            Some(Task::directive(raw))
        }
    }

    /// Whether the input reads as a direct shell invocation
    pub fn looks_like_shell(&self, raw: &str) -> bool {
        let mut tokens = raw.split_whitespace();
        let Some(program) = tokens.next() else {
            return false;
        };

        if ["./", "../", "/", "~/"]
            .iter()
            .any(|prefix| program.starts_with(prefix))
        {
            return true;
        }

        if !self.executables.contains(program) {
            return false;
        }

        if !AMBIGUOUS_WORDS.contains(&program) {
            return true;
        }

        let args: Vec<&str> = tokens.collect();
        args.is_empty() || args.iter().any(|arg| is_shellish(arg))
    }

    /// Classify `raw` and append it to the queue.
    ///
    /// Returns the enqueued task, or `None` when the input was dropped (in
    /// which case neither `tasks` nor `logs` change).
    pub fn classify_and_enqueue(&self, raw: &str, memory: &mut Memory) -> Option<Task> {
        match self.classify(raw) {
            Some(task) => {
                debug!(task = %task, shell = task.is_shell(), "enqueueing task");
                memory.tasks.push(task.clone());
                Some(task)
            }
            None => {
                debug!("dropping empty or fence-only input");
                None
            }
        }
    }
}

fn is_shellish(arg: &str) -> bool {
    arg.starts_with('-')
        || arg.chars().all(|c| c.is_ascii_digit())
        || arg.contains(SHELL_SYNTAX_CHARS)
}

/// Whether the input is nothing but a fenced code block.
///
/// Recognises ```` ``` ```` and `~~~` fences with an optional language tag,
/// both multi-line blocks and single-line forms such as ```` ```json ```` or
/// ```` ```ls``` ````. Text before the opening fence or after the closing
/// fence disqualifies the input, as does an unclosed fence with content.
pub fn is_fence_only(raw: &str) -> bool {
    let trimmed = raw.trim();
    let fence_char = match trimmed.chars().next() {
        Some(c @ ('`' | '~')) => c,
        _ => return false,
    };
    let open_len = trimmed.chars().take_while(|&c| c == fence_char).count();
    if open_len < 3 {
        return false;
    }

    let after_open = &trimmed[open_len..];
    let fence: String = std::iter::repeat(fence_char).take(3).collect();

    match after_open.split_once('\n') {
        None => {
            let rest = after_open.trim();
            if rest.is_empty() {
                return true;
            }
            // Inline block: ```content```
            if let Some(inner) = rest.strip_suffix(fence.as_str()) {
                let inner = inner.trim_end_matches(fence_char);
                return !inner.contains(fence.as_str());
            }
            // Bare opening fence with a language tag
            !rest.contains(char::is_whitespace) && !rest.contains(fence_char)
        }
        Some((info, body)) => {
            if info.contains(fence_char) {
                return false;
            }
            let lines: Vec<&str> = body.lines().collect();
            let closing = lines.iter().position(|line| {
                let line = line.trim();
                line.len() >= open_len && line.chars().all(|c| c == fence_char)
            });
            matches!(closing, Some(idx) if idx == lines.len() - 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_empty_and_whitespace() {
        let classifier = Classifier::new();
        assert_eq!(classifier.classify(""), None);
        assert_eq!(classifier.classify("   \n\t "), None);
    }

    #[test]
    fn test_fence_only_variants() {
        assert!(is_fence_only("```"));
        assert!(is_fence_only("```json"));
        assert!(is_fence_only("```bash\n```"));
        assert!(is_fence_only("```\nls -la\n```"));
        assert!(is_fence_only("  ~~~python\nprint(1)\n~~~  "));
        assert!(is_fence_only("```ls```"));
        assert!(is_fence_only("````\n```\n````"));
    }

    #[test]
    fn test_not_fence_only() {
        assert!(!is_fence_only("run this: ```ls```"));
        assert!(!is_fence_only("```\nls\n```\nthen report back"));
        assert!(!is_fence_only("```a```\ntext\n```b```"));
        assert!(!is_fence_only("```bash\nls"));
        assert!(!is_fence_only("``` hello world"));
        assert!(!is_fence_only("`ls`"));
        assert!(!is_fence_only("echo ```"));
    }

    #[test]
    fn test_llm_marker_kept_verbatim() {
        let classifier = Classifier::new();
        let task = classifier.classify("llm: summarize the logs").unwrap();
        assert_eq!(task.to_string(), "llm: summarize the logs");

        let task = classifier.classify("   llm:plan").unwrap();
        assert_eq!(task.to_string(), "llm:plan");
    }

    #[test]
    fn test_shell_commands_kept_verbatim() {
        let classifier = Classifier::new();
        for cmd in ["echo hello", "df -h", "ps aux | sort -nrk 3,3 | head -n 5", "uptime", "./deploy.sh --dry-run", "~/bin/tool"] {
            assert_eq!(classifier.classify(cmd), Some(Task::shell(cmd)), "{cmd}");
        }
    }

    #[test]
    fn test_ambiguous_words_need_shell_syntax() {
        let classifier = Classifier::new();
        assert!(classifier.looks_like_shell("find . -name '*.rs'"));
        assert!(classifier.looks_like_shell("sort data.csv"));
        assert!(classifier.looks_like_shell("sleep 5"));
        assert!(classifier.looks_like_shell("make"));
        assert!(!classifier.looks_like_shell("find the bug in the parser"));
        assert!(!classifier.looks_like_shell("make a plan for tomorrow"));
        assert!(!classifier.looks_like_shell("test the login flow"));
    }

    #[test]
    fn test_documented_heuristic_examples() {
        let classifier = Classifier::new();
        for shell in ["sleep 5", "go build ./...", "diff a.txt b.txt", "cat", "whoami", "true", "id -u"] {
            assert!(classifier.looks_like_shell(shell), "{shell}");
        }
        for prose in ["sleep on it", "go build", "diff a b", "tree of life", "id the culprit"] {
            assert!(!classifier.looks_like_shell(prose), "{prose}");
        }
    }

    #[test]
    fn test_natural_language_is_coerced() {
        let classifier = Classifier::new();
        let raw = "summarize what happened today";
        let task = classifier.classify(raw).unwrap();
        assert_eq!(task.to_string(), format!("llm:{}", raw));
        assert!(!task.is_shell());
    }

    #[test]
    fn test_extra_executables() {
        let classifier = Classifier::with_extra_executables(["terraform"]);
        assert!(classifier.looks_like_shell("terraform plan"));
        assert!(!Classifier::new().looks_like_shell("terraform plan"));
    }

    #[test]
    fn test_classify_as_directive_ignores_shell_rule() {
        let classifier = Classifier::new();
        let task = classifier.classify_as_directive("echo hi").unwrap();
        assert_eq!(task.to_string(), "llm:echo hi");
        assert_eq!(classifier.classify_as_directive("```\n```"), None);
    }

    #[test]
    fn test_classify_and_enqueue_appends_in_order() {
        let classifier = Classifier::new();
        let mut memory = Memory::default();

        assert!(classifier.classify_and_enqueue("echo a", &mut memory).is_some());
        assert!(classifier.classify_and_enqueue("```", &mut memory).is_none());
        assert!(classifier.classify_and_enqueue("write a haiku", &mut memory).is_some());

        let queued: Vec<String> = memory.tasks.iter().map(|t| t.to_string()).collect();
        assert_eq!(queued, vec!["echo a", "llm:write a haiku"]);
        assert!(memory.logs.is_empty());
    }
}
