//! Logging facade over `defmt`.
//!
//! Host-side unit tests have no global `defmt` logger to link against, so under `cfg(test)`
//! the macros only borrow their arguments.

#![allow(unused_macros)]

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(not(test))]
            ::defmt::trace!($s $(, $x)*);
            #[cfg(test)]
            let _ = ($( &$x, )*);
        }
    };
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(not(test))]
            ::defmt::debug!($s $(, $x)*);
            #[cfg(test)]
            let _ = ($( &$x, )*);
        }
    };
}

macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(not(test))]
            ::defmt::info!($s $(, $x)*);
            #[cfg(test)]
            let _ = ($( &$x, )*);
        }
    };
}

macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(not(test))]
            ::defmt::warn!($s $(, $x)*);
            #[cfg(test)]
            let _ = ($( &$x, )*);
        }
    };
}

macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(not(test))]
            ::defmt::error!($s $(, $x)*);
            #[cfg(test)]
            let _ = ($( &$x, )*);
        }
    };
}
