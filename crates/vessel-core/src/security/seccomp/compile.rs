//! Rule table to BPF compilation.
//!
//! `seccompiler` filters carry one match action and one mismatch action, so
//! a table with several actions becomes a stack of filters:
//!
//! - one filter per non-allow action, returning that action for its
//!   syscalls and allowing everything else;
//! - a base filter allowing every listed syscall and returning the default
//!   action for the rest.
//!
//! The kernel evaluates every installed filter and keeps the most
//! restrictive result. The table is first-match, so a rule's action filter
//! only matches argument values no earlier rule for the same syscall
//! matched: each earlier conjunction is negated and distributed into the
//! rule's own conditions. Masked comparisons have no negation in BPF
//! compare operators, so a masked rule followed by other rules for the
//! same syscall is rejected rather than compiled with different meaning.

use std::collections::{BTreeMap, BTreeSet};

use seccompiler::{
    BpfProgram, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter, SeccompRule,
    TargetArch,
};
use vessel_common::error::{Result, VesselError};

use super::syscalls::syscall_number;
use super::{ArgOp, Arch, DEFAULT_ERRNO, STAGE, SeccompAction, SeccompProfile, SyscallArg};

/// Output of [`compile`].
#[derive(Debug)]
pub struct CompiledFilters {
    /// Programs in installation order.
    pub programs: Vec<BpfProgram>,
    /// Distinct syscalls the table resolved to.
    pub syscalls: usize,
    /// Names with no syscall number on the target architecture.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ActionKey {
    action: SeccompAction,
    data: u32,
}

impl ActionKey {
    const fn new(action: SeccompAction, errno_ret: Option<u32>) -> Self {
        let data = match (action, errno_ret) {
            (SeccompAction::Errno, Some(errno)) => errno,
            (SeccompAction::Errno, None) => DEFAULT_ERRNO,
            (SeccompAction::Trace, Some(msg)) => msg,
            _ => 0,
        };
        Self { action, data }
    }

    const fn to_seccompiler(self) -> seccompiler::SeccompAction {
        match self.action {
            SeccompAction::Allow => seccompiler::SeccompAction::Allow,
            SeccompAction::Errno => seccompiler::SeccompAction::Errno(self.data),
            SeccompAction::Kill => seccompiler::SeccompAction::KillProcess,
            SeccompAction::Trap => seccompiler::SeccompAction::Trap,
            SeccompAction::Trace => seccompiler::SeccompAction::Trace(self.data),
            SeccompAction::Log => seccompiler::SeccompAction::Log,
        }
    }
}

/// Upper bound on rules synthesized for one syscall in one filter.
const MAX_RULES_PER_SYSCALL: usize = 64;

struct Entry<'a> {
    action: ActionKey,
    args: &'a [SyscallArg],
}

/// One comparison, possibly negated.
#[derive(Clone, Copy)]
struct Cond<'a> {
    arg: &'a SyscallArg,
    negated: bool,
}

/// Compiles `profile` into BPF programs for `arch`.
///
/// # Errors
///
/// Returns [`VesselError::Security`] if `arch` is not among the profile's
/// architectures, a rule is malformed, or nothing would be allowed under a
/// restrictive default action.
pub fn compile(profile: &SeccompProfile, arch: Arch) -> Result<CompiledFilters> {
    profile
        .validate()
        .map_err(|e| VesselError::security(STAGE, e.to_string()))?;
    if !profile.architectures.is_empty() && !profile.architectures.contains(&arch) {
        return Err(VesselError::security(
            STAGE,
            format!("profile does not cover the host architecture {arch:?}"),
        ));
    }
    let target = target_arch(arch)?;

    let mut table: BTreeMap<i64, Vec<Entry<'_>>> = BTreeMap::new();
    let mut skipped = BTreeSet::new();
    for rule in &profile.syscalls {
        let action = ActionKey::new(rule.action, rule.errno_ret);
        for name in &rule.names {
            let Some(nr) = syscall_number(name) else {
                tracing::debug!(syscall = %name, "unknown on this architecture, skipped");
                let _ = skipped.insert(name.clone());
                continue;
            };
            let entries = table.entry(nr).or_default();
            // The first unconditional rule for a syscall decides it.
            if entries.iter().any(|e| e.args.is_empty()) {
                continue;
            }
            entries.push(Entry {
                action,
                args: &rule.args,
            });
        }
    }

    let mut base: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
    let mut groups: BTreeMap<ActionKey, BTreeMap<i64, Option<Vec<SeccompRule>>>> = BTreeMap::new();
    for (&nr, entries) in &table {
        let base_rules = if entries.iter().any(|e| e.args.is_empty()) {
            Vec::new()
        } else {
            entries
                .iter()
                .map(|e| rule(e.args))
                .collect::<Result<Vec<_>>>()?
        };
        let _ = base.insert(nr, base_rules);

        for (index, entry) in entries.iter().enumerate() {
            if entry.action.action == SeccompAction::Allow {
                continue;
            }
            let first_match = first_match_rules(nr, entries, index)?;
            let slot = groups
                .entry(entry.action)
                .or_default()
                .entry(nr)
                .or_insert_with(|| Some(Vec::new()));
            match first_match {
                None => *slot = None,
                Some(rules) => {
                    if let Some(existing) = slot {
                        existing.extend(rules);
                    }
                }
            }
        }
    }

    let default = ActionKey::new(profile.default_action, profile.default_errno_ret);
    let mut programs = Vec::with_capacity(groups.len() + 1);
    for (action, syscalls) in groups {
        let rules = syscalls
            .into_iter()
            .map(|(nr, rules)| (nr, rules.unwrap_or_default()))
            .collect();
        programs.push(build(
            rules,
            seccompiler::SeccompAction::Allow,
            action.to_seccompiler(),
            target,
        )?);
    }
    // Installed last: it may refuse seccomp(2) itself.
    if default.action != SeccompAction::Allow {
        if base.is_empty() {
            return Err(VesselError::security(
                STAGE,
                format!(
                    "default action {} with no resolvable syscalls would deny everything",
                    default.action
                ),
            ));
        }
        programs.push(build(
            base,
            default.to_seccompiler(),
            seccompiler::SeccompAction::Allow,
            target,
        )?);
    }

    tracing::debug!(
        filters = programs.len(),
        syscalls = table.len(),
        skipped = skipped.len(),
        "seccomp profile compiled"
    );
    Ok(CompiledFilters {
        programs,
        syscalls: table.len(),
        skipped: skipped.into_iter().collect(),
    })
}

fn build(
    rules: BTreeMap<i64, Vec<SeccompRule>>,
    mismatch: seccompiler::SeccompAction,
    matched: seccompiler::SeccompAction,
    target: TargetArch,
) -> Result<BpfProgram> {
    let filter = SeccompFilter::new(rules, mismatch, matched, target)
        .map_err(|e| VesselError::security(STAGE, format!("building filter: {e}")))?;
    filter
        .try_into()
        .map_err(|e: seccompiler::BackendError| {
            VesselError::security(STAGE, format!("compiling filter: {e}"))
        })
}

fn rule(args: &[SyscallArg]) -> Result<SeccompRule> {
    let conds: Vec<_> = args.iter().map(|arg| Cond { arg, negated: false }).collect();
    rule_from(&conds)
}

fn rule_from(conds: &[Cond<'_>]) -> Result<SeccompRule> {
    let conditions = conds.iter().map(|c| condition(*c)).collect::<Result<Vec<_>>>()?;
    SeccompRule::new(conditions).map_err(|e| VesselError::security(STAGE, format!("rule: {e}")))
}

/// Rules matching exactly when `entries[index]` is the first entry of
/// syscall `nr` to match. `None` means every call matches.
fn first_match_rules(
    nr: i64,
    entries: &[Entry<'_>],
    index: usize,
) -> Result<Option<Vec<SeccompRule>>> {
    let own: Vec<Cond<'_>> = entries[index]
        .args
        .iter()
        .map(|arg| Cond { arg, negated: false })
        .collect();
    let mut clauses = vec![own];
    // Earlier entries are all conditional: an unconditional one ends the list.
    for earlier in &entries[..index] {
        if earlier.args.iter().any(|a| a.op == ArgOp::MaskedEqual) {
            return Err(VesselError::security(
                STAGE,
                format!(
                    "syscall {nr}: a masked comparison cannot be followed by other rules \
                     for the same syscall"
                ),
            ));
        }
        let mut next = Vec::with_capacity(clauses.len() * earlier.args.len());
        for clause in &clauses {
            for arg in earlier.args {
                let mut extended = clause.clone();
                extended.push(Cond { arg, negated: true });
                next.push(extended);
            }
        }
        if next.len() > MAX_RULES_PER_SYSCALL {
            return Err(VesselError::security(
                STAGE,
                format!("syscall {nr}: too many overlapping conditional rules"),
            ));
        }
        clauses = next;
    }
    if clauses.iter().any(Vec::is_empty) {
        return Ok(None);
    }
    clauses
        .iter()
        .map(|clause| rule_from(clause))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn condition(cond: Cond<'_>) -> Result<SeccompCondition> {
    let arg = cond.arg;
    let op = if cond.negated { negate(arg.op) } else { arg.op };
    let (op, value) = match op {
        ArgOp::NotEqual => (SeccompCmpOp::Ne, arg.value),
        ArgOp::LessThan => (SeccompCmpOp::Lt, arg.value),
        ArgOp::LessOrEqual => (SeccompCmpOp::Le, arg.value),
        ArgOp::Equal => (SeccompCmpOp::Eq, arg.value),
        ArgOp::GreaterOrEqual => (SeccompCmpOp::Ge, arg.value),
        ArgOp::GreaterThan => (SeccompCmpOp::Gt, arg.value),
        ArgOp::MaskedEqual => (SeccompCmpOp::MaskedEq(arg.value), arg.value_two),
    };
    SeccompCondition::new(arg.index, SeccompCmpArgLen::Qword, op, value)
        .map_err(|e| VesselError::security(STAGE, format!("argument {} condition: {e}", arg.index)))
}

/// Complement of a comparison. Masked comparisons are rejected before
/// they reach here.
const fn negate(op: ArgOp) -> ArgOp {
    match op {
        ArgOp::NotEqual => ArgOp::Equal,
        ArgOp::Equal => ArgOp::NotEqual,
        ArgOp::LessThan => ArgOp::GreaterOrEqual,
        ArgOp::GreaterOrEqual => ArgOp::LessThan,
        ArgOp::LessOrEqual => ArgOp::GreaterThan,
        ArgOp::GreaterThan => ArgOp::LessOrEqual,
        ArgOp::MaskedEqual => ArgOp::MaskedEqual,
    }
}

fn target_arch(arch: Arch) -> Result<TargetArch> {
    match arch {
        Arch::X86_64 => Ok(TargetArch::x86_64),
        Arch::Aarch64 => Ok(TargetArch::aarch64),
        Arch::X86 | Arch::X32 => Err(VesselError::security(
            STAGE,
            format!("cannot compile filters for {arch:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::seccomp::SyscallRule;

    fn host() -> Arch {
        Arch::host().expect("supported host")
    }

    fn profile(default_action: SeccompAction, syscalls: Vec<SyscallRule>) -> SeccompProfile {
        SeccompProfile {
            default_action,
            default_errno_ret: None,
            architectures: Vec::new(),
            syscalls,
            disabled: false,
        }
    }

    #[test]
    fn default_profile_compiles_to_errno_and_base_filters() {
        let compiled = compile(&SeccompProfile::default_profile(), host()).expect("compile");
        assert_eq!(compiled.programs.len(), 2);
        assert!(compiled.programs.iter().all(|p| !p.is_empty()));
        assert!(compiled.syscalls > 200);
    }

    #[test]
    fn one_filter_per_restrictive_action() {
        let p = profile(
            SeccompAction::Allow,
            vec![
                SyscallRule::new(SeccompAction::Errno, ["mount"]),
                SyscallRule::new(SeccompAction::Kill, ["reboot"]),
                SyscallRule::new(SeccompAction::Log, ["uname"]),
                SyscallRule::new(SeccompAction::Allow, ["read"]),
            ],
        );
        assert_eq!(compile(&p, host()).expect("compile").programs.len(), 3);
    }

    #[test]
    fn distinct_errno_values_get_their_own_filter() {
        let mut eacces = SyscallRule::new(SeccompAction::Errno, ["chmod", "fchmod"]);
        eacces.errno_ret = Some(13);
        let p = profile(
            SeccompAction::Allow,
            vec![SyscallRule::new(SeccompAction::Errno, ["mount"]), eacces],
        );
        assert_eq!(compile(&p, host()).expect("compile").programs.len(), 2);
    }

    #[test]
    fn first_unconditional_rule_wins() {
        let p = profile(
            SeccompAction::Allow,
            vec![
                SyscallRule::new(SeccompAction::Allow, ["getpid"]),
                SyscallRule::new(SeccompAction::Errno, ["getpid"]),
            ],
        );
        let compiled = compile(&p, host()).expect("compile");
        assert!(compiled.programs.is_empty());
        assert_eq!(compiled.syscalls, 1);
    }

    #[test]
    fn conditional_rules_compile() {
        let p = profile(
            SeccompAction::Errno,
            vec![
                SyscallRule::new(SeccompAction::Allow, ["exit_group", "write"]),
                SyscallRule::new(SeccompAction::Allow, ["personality"]).with_arg(0, ArgOp::Equal, 8),
                SyscallRule::new(SeccompAction::Errno, ["ioctl"]).with_arg(1, ArgOp::MaskedEqual, 0xff),
            ],
        );
        assert_eq!(compile(&p, host()).expect("compile").programs.len(), 2);
    }

    #[test]
    fn later_rules_exclude_earlier_matches() {
        let p = profile(
            SeccompAction::Allow,
            vec![
                SyscallRule::new(SeccompAction::Allow, ["dup"]).with_arg(0, ArgOp::Equal, 0),
                SyscallRule::new(SeccompAction::Errno, ["dup"]),
            ],
        );
        let entries = [
            Entry {
                action: ActionKey::new(SeccompAction::Allow, None),
                args: &p.syscalls[0].args,
            },
            Entry {
                action: ActionKey::new(SeccompAction::Errno, None),
                args: &p.syscalls[1].args,
            },
        ];
        let rules = first_match_rules(32, &entries, 1).expect("rules").expect("conditional");
        assert_eq!(rules.len(), 1);
        assert!(first_match_rules(32, &entries, 0).expect("rules").is_some());
        assert_eq!(compile(&p, host()).expect("compile").programs.len(), 1);
    }

    #[test]
    fn negated_conjunctions_are_distributed() {
        let two = SyscallRule::new(SeccompAction::Allow, ["dup"])
            .with_arg(0, ArgOp::GreaterOrEqual, 3)
            .with_arg(0, ArgOp::LessThan, 10);
        let one = SyscallRule::new(SeccompAction::Errno, ["dup"]).with_arg(0, ArgOp::LessThan, 100);
        let entries = [
            Entry {
                action: ActionKey::new(SeccompAction::Allow, None),
                args: &two.args,
            },
            Entry {
                action: ActionKey::new(SeccompAction::Errno, None),
                args: &one.args,
            },
        ];
        // arg0 < 100 and (arg0 < 3 or arg0 >= 10)
        let rules = first_match_rules(32, &entries, 1).expect("rules").expect("conditional");
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn masked_rule_followed_by_another_is_rejected() {
        let p = profile(
            SeccompAction::Allow,
            vec![
                SyscallRule::new(SeccompAction::Allow, ["ioctl"]).with_arg(1, ArgOp::MaskedEqual, 0xff),
                SyscallRule::new(SeccompAction::Errno, ["ioctl"]),
            ],
        );
        let err = compile(&p, host()).expect_err("cannot negate a mask");
        assert!(matches!(err, VesselError::Security { stage: "seccomp", .. }));
    }

    #[test]
    fn negation_is_an_involution() {
        for op in [
            ArgOp::NotEqual,
            ArgOp::Equal,
            ArgOp::LessThan,
            ArgOp::LessOrEqual,
            ArgOp::GreaterOrEqual,
            ArgOp::GreaterThan,
        ] {
            assert_ne!(negate(op), op);
            assert_eq!(negate(negate(op)), op);
        }
    }

    #[test]
    fn unknown_names_are_skipped_and_reported() {
        let p = profile(
            SeccompAction::Errno,
            vec![SyscallRule::new(SeccompAction::Allow, ["read", "not_a_syscall"])],
        );
        let compiled = compile(&p, host()).expect("compile");
        assert_eq!(compiled.skipped, vec!["not_a_syscall".to_string()]);
        assert_eq!(compiled.syscalls, 1);
    }

    #[test]
    fn host_architecture_must_be_listed() {
        let mut p = SeccompProfile::default_profile();
        p.architectures = vec![Arch::X86];
        let err = compile(&p, host()).expect_err("arch not listed");
        assert!(matches!(err, VesselError::Security { stage: "seccomp", .. }));
    }

    #[test]
    fn restrictive_default_with_nothing_allowed_is_rejected() {
        let p = profile(SeccompAction::Kill, vec![SyscallRule::new(SeccompAction::Allow, ["nope"])]);
        assert!(compile(&p, host()).is_err());
    }

    #[test]
    fn errno_defaults_to_eperm() {
        let key = ActionKey::new(SeccompAction::Errno, None);
        assert!(matches!(
            key.to_seccompiler(),
            seccompiler::SeccompAction::Errno(errno) if errno == DEFAULT_ERRNO
        ));
        assert!(matches!(
            ActionKey::new(SeccompAction::Kill, Some(3)).to_seccompiler(),
            seccompiler::SeccompAction::KillProcess
        ));
    }
}
