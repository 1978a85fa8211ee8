use clap::Command;
use std::collections::HashSet;

/// Long option names known to `cmd`, split by whether they take a value
struct LongOptions {
    flags: HashSet<String>,
    valued: HashSet<String>,
}

impl LongOptions {
    fn of(cmd: &Command) -> Self {
        let mut flags = HashSet::from(["help".to_string(), "version".to_string()]);
        let mut valued = HashSet::new();

        for arg in cmd.get_arguments() {
            let Some(long) = arg.get_long() else {
                continue;
            };
            let names = std::iter::once(long).chain(arg.get_all_aliases().unwrap_or_default());
            let set = if arg.get_action().takes_values() {
                &mut valued
            } else {
                &mut flags
            };
            set.extend(names.map(str::to_string));
        }

        Self { flags, valued }
    }

    fn lookup(&self, name: &str) -> Option<bool> {
        if self.valued.contains(name) {
            Some(true)
        } else if self.flags.contains(name) {
            Some(false)
        } else {
            None
        }
    }
}

/// Rewrite single-dash long options (`-futures`, `-compopts=-O`) into the
/// double-dash form clap understands.
///
/// The value following an option that takes one is passed through untouched,
/// so `-compopts -fast` keeps `-fast` as the compiler flag it is.
pub fn normalize_args<I, S>(cmd: &Command, args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let known = LongOptions::of(cmd);
    let mut out = Vec::new();
    let mut expecting_value = false;
    let mut positional_only = false;

    for (index, arg) in args.into_iter().map(Into::into).enumerate() {
        if index == 0 || expecting_value || positional_only {
            expecting_value = false;
            out.push(arg);
            continue;
        }
        if arg == "--" {
            positional_only = true;
            out.push(arg);
            continue;
        }

        let option = long_name(&arg)
            .and_then(|(name, inline)| known.lookup(name).map(|valued| (valued, inline)));

        match option {
            Some((takes_value, has_inline_value)) => {
                expecting_value = takes_value && !has_inline_value;
                if arg.starts_with("--") {
                    out.push(arg);
                } else {
                    out.push(format!("-{arg}"));
                }
            }
            None => out.push(arg),
        }
    }

    out
}

/// Option name of a `-name`, `--name` or `--name=value` argument, and
/// whether it carries its value inline
fn long_name(arg: &str) -> Option<(&str, bool)> {
    let rest = match arg.strip_prefix("--") {
        Some(rest) => rest,
        None => arg.strip_prefix('-').filter(|rest| rest.len() > 1)?,
    };
    match rest.split_once('=') {
        Some((name, _)) => Some((name, true)),
        None => Some((rest, false)),
    }
}
