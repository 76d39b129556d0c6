//! Win32 command-prompt wildcard matching (NT, long file names).
//!
//! This is not a POSIX glob.  The rules, as observed at the prompt:
//!
//!   1. `*` and `*.*` match everything
//!   2. `*.` matches names without an extension
//!   3. `.*` repeated n times matches up to n extensions, or none
//!   4. `?` matches one character; zero or one when only wildcards or a
//!      dot follow it
//!   5. `*` matches across dots; `?` never matches a dot
//!   6. `*.xyz` with a 3-character extension (even containing one or two
//!      `?`) matches any extension *beginning* with xyz
//!   7. `[` and `]` are ordinary name characters
//!
//! The implementation is a greedy backtracking scan: each `*` records a
//! `(pattern, name)` anchor on an explicit stack, and a mismatch pops the
//! most recent anchor and retries one character further into the name.
//! Nothing is allocated beyond that stack, which is bounded by the number
//! of stars in the pattern.

/// Matches `name` against `pattern` under the rules above.
/// Comparison is ASCII case-folded when `case_insensitive` is set.
pub fn matches(name: &str, pattern: &str, case_insensitive: bool) -> bool {
    let s = name.as_bytes();
    let p = pattern.as_bytes();
    let (ls, lp) = (s.len(), p.len());
    let fold = |b: u8| {
        if case_insensitive {
            b.to_ascii_lowercase()
        } else {
            b
        }
    };

    let mut si = 0usize;
    let mut pi = 0usize;
    let mut anchors: Vec<(usize, usize)> = Vec::new();

    loop {
        while si < ls && pi < lp {
            if fold(p[pi]) == fold(s[si]) {
                // A final '.' in the pattern matches end-of-name only,
                // never a literal dot with characters still to come.
                if pi + 1 == lp && p[pi] == b'.' {
                    break;
                }
                pi += 1;
                si += 1;
            } else if p[pi] == b'?' {
                // A dot in the name skips the whole '?' run.
                if s[si] == b'.' {
                    while pi < lp && p[pi] == b'?' {
                        pi += 1;
                    }
                }
                pi += 1;
                si += 1;
            } else if p[pi] == b'*' {
                let star = pi;
                while pi < lp && p[pi] == b'*' {
                    pi += 1;
                }
                // A trailing star swallows the rest of the name.
                if pi == lp {
                    si = ls;
                    break;
                }
                // Star supersedes any question marks that follow it.
                while pi < lp && p[pi] == b'?' {
                    pi += 1;
                }
                if pi == lp {
                    si = ls;
                    break;
                }
                anchors.push((star, si));
                // The star eats characters until the next literal lines up.
                while si < ls && fold(s[si]) != fold(p[pi]) {
                    si += 1;
                }
            } else if let Some(&(star, start)) = anchors.last() {
                // Mismatch: retry from the most recent star, one character
                // further into the name.
                anchors.pop();
                pi = star;
                si = start + 1;
            } else {
                break;
            }
        }

        if si >= ls || anchors.is_empty() {
            break;
        }

        // A final pattern dot stranded mid-name can never match.
        if pi + 1 == lp && p[pi] == b'.' {
            return false;
        }

        // `*.xyz` matches any extension beginning with xyz: if the last
        // matched characters were a 3-byte extension and fewer than 3 name
        // bytes remain, accept.
        if lp >= 5
            && ls - si < 3
            && p[lp - 5] == b'*'
            && p[lp - 4] == b'.'
            && si >= 4
            && s[si - 4] == b'.'
        {
            return true;
        }

        if let Some((star, start)) = anchors.pop() {
            pi = star;
            si = start + 1;
        }
    }

    // Leftover wildcards (and the dots between them) match emptiness.
    while pi < lp && (p[pi] == b'*' || p[pi] == b'?' || p[pi] == b'.') {
        pi += 1;
    }

    pi == lp && si == ls
}
