// Copyright 2025 HyperZoekt Project
// Derived from sourcegraph/zoekt (https://github.com/sourcegraph/zoekt)
// Copyright 2016 Google Inc. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;

/// An already-parsed query tree. There is no parser here; callers build the
/// tree directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Const(bool),
    /// Literal substring. With neither `file_name` nor `content` set, both
    /// the file name and the content are searched.
    Substring {
        pattern: String,
        case_sensitive: bool,
        file_name: bool,
        content: bool,
    },
    Regexp {
        regexp: String,
        case_sensitive: bool,
        file_name: bool,
        content: bool,
    },
    /// Restrict the child (a substring or regexp) to symbol definitions.
    Symbol(Box<Query>),
    Branch {
        pattern: String,
        exact: bool,
    },
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
}

impl Query {
    /// Case-insensitive content-or-name substring.
    pub fn substring(pattern: impl Into<String>) -> Query {
        Query::Substring {
            pattern: pattern.into(),
            case_sensitive: false,
            file_name: false,
            content: false,
        }
    }

    pub fn regexp(regexp: impl Into<String>) -> Query {
        Query::Regexp {
            regexp: regexp.into(),
            case_sensitive: false,
            file_name: false,
            content: false,
        }
    }

    pub fn branch(pattern: impl Into<String>) -> Query {
        Query::Branch {
            pattern: pattern.into(),
            exact: false,
        }
    }

    /// Set case sensitivity on a substring or regexp leaf; other nodes are
    /// returned unchanged.
    pub fn case_sensitive(mut self, yes: bool) -> Query {
        if let Query::Substring { case_sensitive, .. } | Query::Regexp { case_sensitive, .. } =
            &mut self
        {
            *case_sensitive = yes;
        }
        self
    }

    /// Restrict a substring or regexp leaf to file names.
    pub fn file_name_only(mut self) -> Query {
        if let Query::Substring {
            file_name, content, ..
        }
        | Query::Regexp {
            file_name, content, ..
        } = &mut self
        {
            *file_name = true;
            *content = false;
        }
        self
    }

    /// Restrict a substring or regexp leaf to content.
    pub fn content_only(mut self) -> Query {
        if let Query::Substring {
            file_name, content, ..
        }
        | Query::Regexp {
            file_name, content, ..
        } = &mut self
        {
            *file_name = false;
            *content = true;
        }
        self
    }

    /// Fold constants and flatten nested and/or nodes.
    pub fn simplify(self) -> Query {
        let mut q = eval_constants(self);
        loop {
            let (next, changed) = flatten(q);
            q = next;
            if !changed {
                return q;
            }
        }
    }
}

fn eval_constants(q: Query) -> Query {
    match q {
        Query::And(children) => eval_and_or(children, true),
        Query::Or(children) => eval_and_or(children, false),
        Query::Not(child) => match eval_constants(*child) {
            Query::Const(v) => Query::Const(!v),
            ch => Query::Not(Box::new(ch)),
        },
        Query::Substring { ref pattern, .. } if pattern.is_empty() => Query::Const(true),
        Query::Regexp { ref regexp, .. } if regexp.is_empty() => Query::Const(true),
        Query::Branch { ref pattern, .. } if pattern.is_empty() => Query::Const(true),
        q => q,
    }
}

fn eval_and_or(children: Vec<Query>, is_and: bool) -> Query {
    let mut out = Vec::with_capacity(children.len());
    for ch in children.into_iter().map(eval_constants) {
        match ch {
            // the identity element drops out, the absorbing one wins
            Query::Const(v) if v == is_and => continue,
            Query::Const(v) => return Query::Const(v),
            ch => out.push(ch),
        }
    }
    if out.is_empty() {
        return Query::Const(is_and);
    }
    if is_and {
        Query::And(out)
    } else {
        Query::Or(out)
    }
}

fn flatten(q: Query) -> (Query, bool) {
    match q {
        Query::And(mut children) | Query::Or(mut children) if children.len() == 1 => {
            (children.remove(0), true)
        }
        Query::And(children) => {
            let (flat, changed) = flatten_children(children, true);
            (Query::And(flat), changed)
        }
        Query::Or(children) => {
            let (flat, changed) = flatten_children(children, false);
            (Query::Or(flat), changed)
        }
        Query::Not(child) => {
            let (ch, changed) = flatten(*child);
            (Query::Not(Box::new(ch)), changed)
        }
        q => (q, false),
    }
}

fn flatten_children(children: Vec<Query>, is_and: bool) -> (Vec<Query>, bool) {
    let mut flat = Vec::with_capacity(children.len());
    let mut changed = false;
    for ch in children {
        let (ch, sub_changed) = flatten(ch);
        changed |= sub_changed;
        match ch {
            Query::And(grand) if is_and => {
                changed = true;
                flat.extend(grand);
            }
            Query::Or(grand) if !is_and => {
                changed = true;
                flat.extend(grand);
            }
            ch => flat.push(ch),
        }
    }
    (flat, changed)
}

fn join(f: &mut fmt::Formatter<'_>, op: &str, children: &[Query]) -> fmt::Result {
    write!(f, "({}", op)?;
    for ch in children {
        write!(f, " {}", ch)?;
    }
    write!(f, ")")
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Const(true) => write!(f, "TRUE"),
            Query::Const(false) => write!(f, "FALSE"),
            Query::Substring {
                pattern,
                case_sensitive,
                file_name,
                content,
            } => {
                let case = if *case_sensitive { "case_" } else { "" };
                let scope = if *file_name {
                    "file_"
                } else if *content {
                    "content_"
                } else {
                    ""
                };
                write!(f, "{}{}substr:{:?}", case, scope, pattern)
            }
            Query::Regexp {
                regexp,
                case_sensitive,
                file_name,
                ..
            } => {
                let case = if *case_sensitive { "case_" } else { "" };
                let scope = if *file_name { "file_" } else { "" };
                write!(f, "{}{}regex:{:?}", case, scope, regexp)
            }
            Query::Symbol(inner) => write!(f, "sym:{}", inner),
            Query::Branch { pattern, exact } => {
                let op = if *exact { '=' } else { ':' };
                write!(f, "branch{}{:?}", op, pattern)
            }
            Query::And(children) => join(f, "and", children),
            Query::Or(children) => join(f, "or", children),
            Query::Not(inner) => write!(f, "(not {})", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_s_expression() {
        let q = Query::And(vec![
            Query::substring("foo").case_sensitive(true),
            Query::Not(Box::new(Query::regexp("ba+r").file_name_only())),
            Query::branch("main"),
        ]);
        assert_eq!(
            q.to_string(),
            r#"(and case_substr:"foo" (not file_regex:"ba+r") branch:"main")"#
        );
        assert_eq!(
            Query::Symbol(Box::new(Query::substring("x").content_only())).to_string(),
            r#"sym:content_substr:"x""#
        );
    }

    #[test]
    fn simplify_folds_constants() {
        let q = Query::And(vec![Query::Const(true), Query::substring("a")]);
        assert_eq!(q.simplify(), Query::substring("a"));

        let q = Query::Or(vec![Query::substring("a"), Query::Const(true)]);
        assert_eq!(q.simplify(), Query::Const(true));

        let q = Query::Not(Box::new(Query::substring("")));
        assert_eq!(q.simplify(), Query::Const(false));

        let q = Query::And(vec![Query::Const(true), Query::Const(true)]);
        assert_eq!(q.simplify(), Query::Const(true));
    }

    #[test]
    fn simplify_flattens_nested() {
        let q = Query::And(vec![
            Query::And(vec![Query::substring("a"), Query::substring("b")]),
            Query::Or(vec![Query::Or(vec![Query::substring("c")])]),
        ]);
        assert_eq!(
            q.simplify(),
            Query::And(vec![
                Query::substring("a"),
                Query::substring("b"),
                Query::substring("c"),
            ])
        );
    }
}
