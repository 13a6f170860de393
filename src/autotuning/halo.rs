//! Disabling halo exchange for tuning runs.

use super::kernel::{ArgValue, Arguments, Message, Neighborhood, ParamKind, Parameter, Ranks, PROC_NULL};
use log::debug;

/// Points every neighbour rank and message endpoint at [`PROC_NULL`]
/// while alive; the original ranks come back when dropped.
#[derive(Debug, Default)]
pub struct HaloGuard {
    neighborhoods: Vec<(Neighborhood, Vec<(String, i32)>)>,
    messages: Vec<(Message, Ranks)>,
}

impl HaloGuard {
    /// Disable the halo exchange of every routing parameter in `args`.
    pub fn disable(parameters: &[Parameter], args: &Arguments) -> Self {
        let mut guard = Self::default();
        for p in parameters {
            match (p.kind, args.get(&p.name)) {
                (ParamKind::Neighborhood, Some(ArgValue::Neighborhood(nb))) => {
                    let saved: Vec<(String, i32)> = nb.fields().into_iter().collect();
                    for (field, _) in &saved {
                        nb.set(field, PROC_NULL);
                    }
                    guard.neighborhoods.push((nb.clone(), saved));
                }
                (ParamKind::MessageTable, Some(ArgValue::Messages(msgs))) => {
                    for msg in msgs {
                        guard.messages.push((msg.clone(), msg.ranks()));
                        msg.set_ranks(Ranks { from: PROC_NULL, to: PROC_NULL });
                    }
                }
                _ => {}
            }
        }
        if !guard.is_empty() {
            debug!("AutoTuner: halo exchange disabled for tuning");
        }
        guard
    }

    /// Whether no routing field was touched
    pub fn is_empty(&self) -> bool {
        self.neighborhoods.is_empty() && self.messages.is_empty()
    }
}

impl Drop for HaloGuard {
    fn drop(&mut self) {
        for (nb, saved) in &self.neighborhoods {
            for (field, rank) in saved {
                nb.set(field, *rank);
            }
        }
        for (msg, ranks) in &self.messages {
            msg.set_ranks(*ranks);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_ranks() {
        let nb = Neighborhood::new([("left", 0), ("right", 2)]);
        let msg = Message::new(1, 3);
        let params = vec![
            Parameter::new("nb", ParamKind::Neighborhood),
            Parameter::new("msgs", ParamKind::MessageTable),
        ];
        let mut args = Arguments::new();
        args.insert("nb".to_string(), ArgValue::Neighborhood(nb.clone()));
        args.insert("msgs".to_string(), ArgValue::Messages(vec![msg.clone()]));

        {
            let guard = HaloGuard::disable(&params, &args);
            assert!(!guard.is_empty());
            assert_eq!(nb.get("right"), Some(PROC_NULL));
            assert_eq!(msg.ranks(), Ranks { from: PROC_NULL, to: PROC_NULL });
        }
        assert_eq!(nb.get("left"), Some(0));
        assert_eq!(nb.get("right"), Some(2));
        assert_eq!(msg.ranks(), Ranks { from: 1, to: 3 });
    }
}
