pub mod asymmetry_functions;
pub mod error;
pub mod fake_functions;
pub mod index_functions;
pub mod profile_functions;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use pyo3::prelude::*;

use crate::asymmetry_functions::RadialProfiler;

// One profiler per process: every binding funnels through this lock, so the
// caches' grow-then-use sequence stays single-caller.
static PROFILER: LazyLock<Mutex<RadialProfiler>> =
    LazyLock::new(|| Mutex::new(RadialProfiler::new()));

pub(crate) fn shared_profiler() -> MutexGuard<'static, RadialProfiler> {
    // the guarded state is plain numeric caches, safe to reuse after a panic
    PROFILER.lock().unwrap_or_else(PoisonError::into_inner)
}

#[pymodule]
#[pyo3(name = "_radprof")]
mod radprof {
    use super::*;

    #[pymodule]
    mod index_functions {
        #[pymodule_export]
        use crate::index_functions::{radial_index_table, squared_radius_table};
    }

    #[pymodule]
    mod profile_functions {
        #[pymodule_export]
        use crate::profile_functions::{radial_profile, radial_profile_sq};
    }

    #[pymodule]
    mod asymmetry_functions {
        #[pymodule_export]
        use crate::asymmetry_functions::{radial_asymmetry, radial_asymmetry_weighted};
    }

    #[pymodule]
    mod fake_functions {
        #[pymodule_export]
        use crate::fake_functions::{add_noise, fake_star};
    }
}
