//! Resource limits applied to the launcher before it forks.
//!
//! The daemon inherits them as value copies, so the launcher limits itself
//! exactly like the process it is about to spawn.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::str::FromStr;

use nix::sys::resource::{self, Resource};

use crate::error::{LaunchError, LaunchResult};

/// Categories of resource limits the launcher knows how to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LimitCategory {
    Cpu,
    FileSize,
    Data,
    Stack,
    Core,
    OpenFiles,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    Rss,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    AddressSpace,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    Processes,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    MemLock,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    Locks,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    SigPending,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    MsgQueue,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    Nice,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    RtPrio,
}

impl LimitCategory {
    /// Every category available on this platform, in installation order.
    pub const ALL: &'static [LimitCategory] = &[
        LimitCategory::Cpu,
        LimitCategory::FileSize,
        LimitCategory::Data,
        LimitCategory::Stack,
        LimitCategory::Core,
        LimitCategory::OpenFiles,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        LimitCategory::Rss,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        LimitCategory::AddressSpace,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        LimitCategory::Processes,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        LimitCategory::MemLock,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        LimitCategory::Locks,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        LimitCategory::SigPending,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        LimitCategory::MsgQueue,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        LimitCategory::Nice,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        LimitCategory::RtPrio,
    ];

    /// Display name, as the C headers spell it.
    pub fn name(self) -> &'static str {
        match self {
            LimitCategory::Cpu => "RLIMIT_CPU",
            LimitCategory::FileSize => "RLIMIT_FSIZE",
            LimitCategory::Data => "RLIMIT_DATA",
            LimitCategory::Stack => "RLIMIT_STACK",
            LimitCategory::Core => "RLIMIT_CORE",
            LimitCategory::OpenFiles => "RLIMIT_NOFILE",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Rss => "RLIMIT_RSS",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::AddressSpace => "RLIMIT_AS",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Processes => "RLIMIT_NPROC",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::MemLock => "RLIMIT_MEMLOCK",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Locks => "RLIMIT_LOCKS",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::SigPending => "RLIMIT_SIGPENDING",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::MsgQueue => "RLIMIT_MSGQUEUE",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Nice => "RLIMIT_NICE",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::RtPrio => "RLIMIT_RTPRIO",
        }
    }

    /// Long option taking the soft value, e.g. `rlimit-nofile-soft`.
    pub fn soft_flag(self) -> &'static str {
        match self {
            LimitCategory::Cpu => "rlimit-cpu-soft",
            LimitCategory::FileSize => "rlimit-fsize-soft",
            LimitCategory::Data => "rlimit-data-soft",
            LimitCategory::Stack => "rlimit-stack-soft",
            LimitCategory::Core => "rlimit-core-soft",
            LimitCategory::OpenFiles => "rlimit-nofile-soft",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Rss => "rlimit-rss-soft",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::AddressSpace => "rlimit-as-soft",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Processes => "rlimit-nproc-soft",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::MemLock => "rlimit-memlock-soft",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Locks => "rlimit-locks-soft",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::SigPending => "rlimit-sigpending-soft",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::MsgQueue => "rlimit-msgqueue-soft",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Nice => "rlimit-nice-soft",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::RtPrio => "rlimit-rtprio-soft",
        }
    }

    /// Long option taking the hard value, e.g. `rlimit-nofile-hard`.
    pub fn hard_flag(self) -> &'static str {
        match self {
            LimitCategory::Cpu => "rlimit-cpu-hard",
            LimitCategory::FileSize => "rlimit-fsize-hard",
            LimitCategory::Data => "rlimit-data-hard",
            LimitCategory::Stack => "rlimit-stack-hard",
            LimitCategory::Core => "rlimit-core-hard",
            LimitCategory::OpenFiles => "rlimit-nofile-hard",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Rss => "rlimit-rss-hard",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::AddressSpace => "rlimit-as-hard",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Processes => "rlimit-nproc-hard",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::MemLock => "rlimit-memlock-hard",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Locks => "rlimit-locks-hard",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::SigPending => "rlimit-sigpending-hard",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::MsgQueue => "rlimit-msgqueue-hard",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Nice => "rlimit-nice-hard",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::RtPrio => "rlimit-rtprio-hard",
        }
    }

    fn resource(self) -> Resource {
        match self {
            LimitCategory::Cpu => Resource::RLIMIT_CPU,
            LimitCategory::FileSize => Resource::RLIMIT_FSIZE,
            LimitCategory::Data => Resource::RLIMIT_DATA,
            LimitCategory::Stack => Resource::RLIMIT_STACK,
            LimitCategory::Core => Resource::RLIMIT_CORE,
            LimitCategory::OpenFiles => Resource::RLIMIT_NOFILE,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Rss => Resource::RLIMIT_RSS,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::AddressSpace => Resource::RLIMIT_AS,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Processes => Resource::RLIMIT_NPROC,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::MemLock => Resource::RLIMIT_MEMLOCK,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Locks => Resource::RLIMIT_LOCKS,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::SigPending => Resource::RLIMIT_SIGPENDING,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::MsgQueue => Resource::RLIMIT_MSGQUEUE,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::Nice => Resource::RLIMIT_NICE,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            LimitCategory::RtPrio => Resource::RLIMIT_RTPRIO,
        }
    }
}

impl fmt::Display for LimitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One side of a limit pair. `Infinity` orders above every finite value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LimitValue {
    Finite(u64),
    Infinity,
}

impl LimitValue {
    pub fn is_finite(self) -> bool {
        matches!(self, LimitValue::Finite(_))
    }

    fn from_raw(raw: libc::rlim_t) -> Self {
        if raw == libc::RLIM_INFINITY {
            LimitValue::Infinity
        } else {
            LimitValue::Finite(raw as u64)
        }
    }

    fn to_raw(self) -> libc::rlim_t {
        match self {
            LimitValue::Finite(v) => v as libc::rlim_t,
            LimitValue::Infinity => libc::RLIM_INFINITY,
        }
    }
}

impl fmt::Display for LimitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitValue::Finite(v) => write!(f, "{}", v),
            LimitValue::Infinity => f.write_str("unlimited"),
        }
    }
}

impl FromStr for LimitValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "unlimited" | "infinity" | "inf" => Ok(LimitValue::Infinity),
            other => {
                let value = other
                    .parse::<u64>()
                    .map_err(|_| format!("invalid limit value `{}' (expected a number or `unlimited')", s))?;
                // The number the system reserves for "no limit" is not a finite value.
                match libc::rlim_t::try_from(value) {
                    Ok(raw) if raw != libc::RLIM_INFINITY => Ok(LimitValue::Finite(value)),
                    _ => Err(format!("limit value `{}' is out of range (use `unlimited' for no limit)", s)),
                }
            }
        }
    }
}

/// Requested soft/hard values for one category. `None` leaves that side untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimitRequest {
    pub soft: Option<LimitValue>,
    pub hard: Option<LimitValue>,
}

impl LimitRequest {
    pub fn is_empty(&self) -> bool {
        self.soft.is_none() && self.hard.is_none()
    }

    /// Combines this request with the current `(soft, hard)` pair.
    ///
    /// A soft value above the current finite ceiling is rejected unless a new
    /// hard value is requested too; a soft value above the resulting finite
    /// hard value is clamped down to it.
    ///
    /// Unlike a strict ceiling check, a request carrying a hard value is never
    /// rejected: `soft=4096, hard=0` under a zero ceiling becomes `0/0`.
    pub fn resolve(
        &self,
        category: LimitCategory,
        current: (LimitValue, LimitValue),
    ) -> LaunchResult<(LimitValue, LimitValue)> {
        let (mut soft, mut hard) = current;

        if let Some(requested) = self.soft {
            if self.hard.is_none() && hard.is_finite() && requested > hard {
                return Err(LaunchError::Limit {
                    category,
                    soft: requested,
                    hard,
                });
            }
            soft = requested;
        }
        if let Some(requested) = self.hard {
            hard = requested;
        }
        if hard.is_finite() && soft > hard {
            soft = hard;
        }
        Ok((soft, hard))
    }

    fn describe(&self, category: LimitCategory) -> String {
        let mut parts = Vec::with_capacity(2);
        if let Some(soft) = self.soft {
            parts.push(format!("{}_SOFT={}", category, soft));
        }
        if let Some(hard) = self.hard {
            parts.push(format!("{}_HARD={}", category, hard));
        }
        parts.join(", ")
    }
}

/// Where limits are read from and installed to.
pub trait LimitTable {
    fn get(&self, category: LimitCategory) -> io::Result<(LimitValue, LimitValue)>;
    fn set(&mut self, category: LimitCategory, soft: LimitValue, hard: LimitValue) -> io::Result<()>;
}

/// The limits of the calling process (`getrlimit`/`setrlimit`).
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLimits;

impl LimitTable for ProcessLimits {
    fn get(&self, category: LimitCategory) -> io::Result<(LimitValue, LimitValue)> {
        let (soft, hard) = resource::getrlimit(category.resource())?;
        Ok((LimitValue::from_raw(soft), LimitValue::from_raw(hard)))
    }

    fn set(&mut self, category: LimitCategory, soft: LimitValue, hard: LimitValue) -> io::Result<()> {
        resource::setrlimit(category.resource(), soft.to_raw(), hard.to_raw())?;
        Ok(())
    }
}

/// Installs every non-empty request, one `set` per category with both fields.
/// Stops at the first failure.
pub fn apply_limits<T: LimitTable>(
    requests: &BTreeMap<LimitCategory, LimitRequest>,
    table: &mut T,
) -> LaunchResult<()> {
    for (&category, request) in requests {
        if request.is_empty() {
            continue;
        }
        let current = table
            .get(category)
            .map_err(|e| LaunchError::syscall_on("getrlimit", category.name(), e))?;
        let (soft, hard) = request.resolve(category, current)?;

        tracing::debug!(%category, %soft, %hard, "installing resource limit");
        table
            .set(category, soft, hard)
            .map_err(|e| LaunchError::syscall_on("setrlimit", request.describe(category), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    use LimitValue::{Finite, Infinity};

    #[derive(Default)]
    struct FakeTable {
        current: HashMap<LimitCategory, (LimitValue, LimitValue)>,
        installed: Vec<(LimitCategory, LimitValue, LimitValue)>,
        refuse: bool,
    }

    impl FakeTable {
        fn with(category: LimitCategory, soft: LimitValue, hard: LimitValue) -> Self {
            let mut table = FakeTable::default();
            table.current.insert(category, (soft, hard));
            table
        }
    }

    impl LimitTable for FakeTable {
        fn get(&self, category: LimitCategory) -> io::Result<(LimitValue, LimitValue)> {
            Ok(self.current.get(&category).copied().unwrap_or((Infinity, Infinity)))
        }

        fn set(&mut self, category: LimitCategory, soft: LimitValue, hard: LimitValue) -> io::Result<()> {
            if self.refuse {
                return Err(io::Error::from_raw_os_error(libc::EPERM));
            }
            self.installed.push((category, soft, hard));
            self.current.insert(category, (soft, hard));
            Ok(())
        }
    }

    fn one(category: LimitCategory, soft: Option<LimitValue>, hard: Option<LimitValue>) -> BTreeMap<LimitCategory, LimitRequest> {
        BTreeMap::from([(category, LimitRequest { soft, hard })])
    }

    #[test]
    fn soft_above_current_ceiling_is_rejected_and_nothing_installed() {
        for &category in LimitCategory::ALL {
            let mut table = FakeTable::with(category, Finite(2), Finite(5));
            let err = apply_limits(&one(category, Some(Finite(10)), None), &mut table).unwrap_err();
            match err {
                LaunchError::Limit { category: c, soft, hard } => {
                    assert_eq!(c, category);
                    assert_eq!(soft, Finite(10));
                    assert_eq!(hard, Finite(5));
                }
                other => panic!("unexpected error: {other}"),
            }
            assert!(table.installed.is_empty());
        }
    }

    #[test]
    fn soft_above_new_hard_is_clamped() {
        for &category in LimitCategory::ALL {
            let mut table = FakeTable::with(category, Finite(1), Finite(100));
            apply_limits(&one(category, Some(Finite(10)), Some(Finite(5))), &mut table).unwrap();
            assert_eq!(table.installed, vec![(category, Finite(5), Finite(5))]);
        }
    }

    #[test]
    fn raising_the_hard_ceiling_permits_a_higher_soft() {
        let mut table = FakeTable::with(LimitCategory::OpenFiles, Finite(64), Finite(128));
        apply_limits(
            &one(LimitCategory::OpenFiles, Some(Finite(512)), Some(Finite(1024))),
            &mut table,
        )
        .unwrap();
        assert_eq!(table.installed, vec![(LimitCategory::OpenFiles, Finite(512), Finite(1024))]);
    }

    #[test]
    fn hard_only_request_clamps_existing_soft() {
        let mut table = FakeTable::with(LimitCategory::Core, Finite(4096), Infinity);
        apply_limits(&one(LimitCategory::Core, None, Some(Finite(0))), &mut table).unwrap();
        assert_eq!(table.installed, vec![(LimitCategory::Core, Finite(0), Finite(0))]);
    }

    #[test]
    fn infinite_ceiling_accepts_any_soft() {
        let mut table = FakeTable::with(LimitCategory::Cpu, Finite(10), Infinity);
        apply_limits(&one(LimitCategory::Cpu, Some(Finite(u64::MAX - 1)), None), &mut table).unwrap();
        assert_eq!(table.installed, vec![(LimitCategory::Cpu, Finite(u64::MAX - 1), Infinity)]);
    }

    #[test]
    fn unlimited_soft_under_finite_ceiling_is_rejected() {
        let request = LimitRequest { soft: Some(Infinity), hard: None };
        let err = request
            .resolve(LimitCategory::Stack, (Finite(8192), Finite(65536)))
            .unwrap_err();
        assert!(matches!(err, LaunchError::Limit { soft: Infinity, .. }));
    }

    #[test]
    fn empty_requests_are_skipped() {
        let mut table = FakeTable::default();
        let requests = BTreeMap::from([(LimitCategory::Data, LimitRequest::default())]);
        apply_limits(&requests, &mut table).unwrap();
        assert!(table.installed.is_empty());
    }

    #[test]
    fn install_failure_names_category_and_value() {
        let mut table = FakeTable::with(LimitCategory::OpenFiles, Finite(64), Finite(128));
        table.refuse = true;
        let err = apply_limits(&one(LimitCategory::OpenFiles, Some(Finite(32)), None), &mut table).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("setrlimit"), "{msg}");
        assert!(msg.contains("RLIMIT_NOFILE_SOFT=32"), "{msg}");
    }

    #[test]
    fn parses_numbers_and_unlimited() {
        assert_eq!("42".parse::<LimitValue>().unwrap(), Finite(42));
        assert_eq!("unlimited".parse::<LimitValue>().unwrap(), Infinity);
        assert_eq!("infinity".parse::<LimitValue>().unwrap(), Infinity);
        assert!("-1".parse::<LimitValue>().is_err());
        assert!("lots".parse::<LimitValue>().is_err());
    }

    #[test]
    fn the_infinity_sentinel_is_not_a_finite_value() {
        let sentinel = (libc::RLIM_INFINITY as u64).to_string();
        let err = sentinel.parse::<LimitValue>().unwrap_err();
        assert!(err.contains("out of range"), "{err}");

        let below = (libc::RLIM_INFINITY as u64 - 1).to_string();
        assert_eq!(below.parse::<LimitValue>().unwrap(), Finite(libc::RLIM_INFINITY as u64 - 1));
    }

    #[test]
    fn infinity_orders_above_finite() {
        assert!(Infinity > Finite(u64::MAX));
        assert!(Finite(3) < Finite(4));
    }

    #[test]
    fn names_and_flags_are_unique() {
        let names: HashSet<_> = LimitCategory::ALL.iter().map(|c| c.name()).collect();
        let soft: HashSet<_> = LimitCategory::ALL.iter().map(|c| c.soft_flag()).collect();
        let hard: HashSet<_> = LimitCategory::ALL.iter().map(|c| c.hard_flag()).collect();
        assert_eq!(names.len(), LimitCategory::ALL.len());
        assert_eq!(soft.len(), LimitCategory::ALL.len());
        assert_eq!(hard.len(), LimitCategory::ALL.len());
    }

    #[test]
    fn process_limits_can_be_read() {
        let (soft, hard) = ProcessLimits.get(LimitCategory::OpenFiles).unwrap();
        assert!(soft <= hard);
    }
}
