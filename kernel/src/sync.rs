//! The kernel's one lock type. Every lock here is a plain spin lock; masking
//! interrupts around a critical section is up to the caller.

#[cfg(feature = "ticket_mutex")]
pub type Mutex<T> = spin::mutex::TicketMutex<T>;
#[cfg(feature = "ticket_mutex")]
pub type MutexGuard<'a, T> = spin::mutex::TicketMutexGuard<'a, T>;

#[cfg(not(feature = "ticket_mutex"))]
pub type Mutex<T> = spin::mutex::SpinMutex<T>;
#[cfg(not(feature = "ticket_mutex"))]
pub type MutexGuard<'a, T> = spin::mutex::SpinMutexGuard<'a, T>;
