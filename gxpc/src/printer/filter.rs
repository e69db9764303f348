//! Inclusion/exclusion rules for agent records
//!
//! Patterns are shell globs (`*` any run, `?` one character, everything else
//! literal) compiled once to regular expressions when the rule set is built.
//! Connection-name patterns match anywhere in the name; pid patterns must
//! match the whole decimal pid.

use regex::Regex;

use crate::domain::{FilterError, Pid};

/// Translate a glob into regex source
pub fn glob_to_regex(glob: &str, anchored: bool) -> String {
    let mut source = String::with_capacity(glob.len() + 8);
    if anchored {
        source.push('^');
    }
    for c in glob.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            c => source.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }
    if anchored {
        source.push('$');
    }
    source
}

/// Compiled glob list
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<Regex>,
}

impl PatternList {
    pub fn compile<S: AsRef<str>>(globs: &[S], anchored: bool) -> Result<Self, FilterError> {
        let patterns = globs
            .iter()
            .map(|glob| {
                let glob = glob.as_ref();
                Regex::new(&glob_to_regex(glob, anchored))
                    .map_err(|source| FilterError::InvalidPattern { pattern: glob.to_string(), source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True if any pattern matches `text`
    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(text))
    }
}

/// The four rule lists, immutable after startup
#[derive(Debug, Clone, Default)]
pub struct FilterRules {
    whitelist_name: PatternList,
    blacklist_name: PatternList,
    whitelist_pid: PatternList,
    blacklist_pid: PatternList,
}

impl FilterRules {
    pub fn compile<S: AsRef<str>>(
        whitelist_name: &[S],
        blacklist_name: &[S],
        whitelist_pid: &[S],
        blacklist_pid: &[S],
    ) -> Result<Self, FilterError> {
        Ok(Self {
            whitelist_name: PatternList::compile(whitelist_name, false)?,
            blacklist_name: PatternList::compile(blacklist_name, false)?,
            whitelist_pid: PatternList::compile(whitelist_pid, true)?,
            blacklist_pid: PatternList::compile(blacklist_pid, true)?,
        })
    }

    /// Decide whether a record passes.
    ///
    /// Name lists take precedence: when either is non-empty the pid lists are
    /// not consulted. Each pair is evaluated allow-then-deny.
    pub fn allows(&self, conn_name: &str, pid: Option<Pid>) -> bool {
        if !self.whitelist_name.is_empty() || !self.blacklist_name.is_empty() {
            return allow_then_deny(&self.whitelist_name, &self.blacklist_name, conn_name);
        }
        match pid {
            Some(pid) if pid.0 > 0 => {
                allow_then_deny(&self.whitelist_pid, &self.blacklist_pid, &pid.to_string())
            }
            _ => true,
        }
    }
}

fn allow_then_deny(allow: &PatternList, deny: &PatternList, text: &str) -> bool {
    if !allow.is_empty() && !allow.matches(text) {
        return false;
    }
    !deny.matches(text)
}
