use crate::error::{Error, Result};

/// Longest symbol/description a kprobe name can encode: the kernel event
/// name is `k_race_<index>` (at most 65 bytes including the trailing
/// NUL), and `add_kprobe` in the original needs room for the
/// `<type>:k_race_<index> <location>\n` line, which leaves 50 bytes for
/// the description itself.
pub const MAX_DESCRIPTION_LEN: usize = 50;

/// A named kernel probe site with its role flags.
///
/// A description ending in `:ret` selects a return-probe; `symbol()`
/// strips that suffix to get the bare kernel symbol to probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RacePoint {
    pub description: String,
    pub opens: bool,
    pub triggers: bool,
    pub closes: bool,
}

impl RacePoint {
    fn new(description: String) -> Self {
        RacePoint {
            description,
            opens: false,
            triggers: false,
            closes: false,
        }
    }

    /// `true` if this probe should be installed as a kretprobe.
    pub fn is_return_probe(&self) -> bool {
        self.description.ends_with(":ret")
    }

    /// The bare kernel symbol, with any `:ret` suffix stripped.
    pub fn symbol(&self) -> &str {
        self.description
            .strip_suffix(":ret")
            .unwrap_or(&self.description)
    }
}

#[derive(Clone, Copy)]
pub(super) enum Role {
    Open,
    Trigger,
    Close,
}

/// Folds `descriptions` into `points`, merging role flags into an
/// existing entry when a description repeats, so the same kprobe can
/// serve as e.g. both an open and a close point.
pub(super) fn merge_points(points: &mut Vec<RacePoint>, descriptions: &[String], role: Role) -> Result<()> {
    for desc in descriptions {
        let bare = desc.strip_suffix(":ret").unwrap_or(desc);
        if bare.len() > MAX_DESCRIPTION_LEN {
            return Err(Error::config(format!(
                "race point description \"{desc}\" exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }

        let point = match points.iter_mut().find(|p| p.description == *desc) {
            Some(p) => p,
            None => {
                points.push(RacePoint::new(desc.clone()));
                points.last_mut().unwrap()
            }
        };
        match role {
            Role::Open => point.opens = true,
            Role::Trigger => point.triggers = true,
            Role::Close => point.closes = true,
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    // opened_by: [a, b], triggered_by: a, closed_by: [a, c] -> 3 race
    // points; a has opens=triggers=closes=1; b has opens=1; c has
    // closes=1.
    #[test]
    fn config_merge_by_description() {
        let mut points = Vec::new();
        merge_points(
            &mut points,
            &["a".into(), "b".into()],
            Role::Open,
        )
        .unwrap();
        merge_points(&mut points, &["a".into()], Role::Trigger).unwrap();
        merge_points(
            &mut points,
            &["a".into(), "c".into()],
            Role::Close,
        )
        .unwrap();

        assert_eq!(points.len(), 3);
        let a = points.iter().find(|p| p.description == "a").unwrap();
        assert!(a.opens && a.triggers && a.closes);
        let b = points.iter().find(|p| p.description == "b").unwrap();
        assert!(b.opens && !b.triggers && !b.closes);
        let c = points.iter().find(|p| p.description == "c").unwrap();
        assert!(!c.opens && !c.triggers && c.closes);
    }

    #[test]
    fn ret_suffix_selects_return_probe() {
        let mut points = Vec::new();
        merge_points(&mut points, &["do_sys_open:ret".into()], Role::Close).unwrap();
        assert!(points[0].is_return_probe());
        assert_eq!(points[0].symbol(), "do_sys_open");
    }

    #[test]
    fn description_too_long_is_rejected() {
        let mut points = Vec::new();
        let long = "x".repeat(MAX_DESCRIPTION_LEN + 1);
        assert!(merge_points(&mut points, &[long], Role::Open).is_err());
    }
}
