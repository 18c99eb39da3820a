//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Self-ownership for connection-like objects
//!
//! A connection keeps itself alive for exactly as long as its pending
//! asynchronous operations need it: every continuation captures the strong
//! reference returned by [`Shared::selfptr`], and nothing else does. Objects
//! built with [`Arc::new_cyclic`] can upgrade; plain values cannot, so they
//! fail [`Lifecycle::begin_start`](crate::Lifecycle::begin_start) instead of
//! dangling.

use std::fmt;
use std::sync::{Arc, Weak};

/// Weak self-reference stored inside a shareable object
pub enum SelfRef<T> {
    /// Shared ownership enabled; upgrades while the object is owned by an `Arc`
    Enabled(Weak<T>),
    /// Shared ownership disabled; never upgrades
    Disabled,
}

impl<T> SelfRef<T> {
    /// Self-reference for an object being built by [`Arc::new_cyclic`]
    pub fn new(weak: &Weak<T>) -> Self {
        SelfRef::Enabled(weak.clone())
    }

    /// Self-reference for a value that is not owned by an `Arc`
    pub fn detached() -> Self {
        SelfRef::Enabled(Weak::new())
    }

    /// Self-reference with shared ownership turned off
    pub fn disabled() -> Self {
        SelfRef::Disabled
    }

    /// Check whether shared ownership is enabled
    pub fn is_enabled(&self) -> bool {
        matches!(self, SelfRef::Enabled(_))
    }

    /// Try to obtain a strong reference
    pub fn upgrade(&self) -> Option<Arc<T>> {
        match self {
            SelfRef::Enabled(weak) => weak.upgrade(),
            SelfRef::Disabled => None,
        }
    }

    /// Number of strong references currently keeping the object alive
    pub fn strong_count(&self) -> usize {
        match self {
            SelfRef::Enabled(weak) => weak.strong_count(),
            SelfRef::Disabled => 0,
        }
    }
}

impl<T> fmt::Debug for SelfRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelfRef::Enabled(weak) => write!(f, "SelfRef::Enabled(strong={})", weak.strong_count()),
            SelfRef::Disabled => write!(f, "SelfRef::Disabled"),
        }
    }
}

/// Objects that can hand out strong references to themselves
///
/// Provided methods are monomorphized for the concrete type, so the
/// components built on top of this trait dispatch statically.
pub trait Shared: Send + Sync + Sized + 'static {
    /// The object's weak self-reference
    fn self_ref(&self) -> &SelfRef<Self>;

    /// Strong reference to `self`, or `None` if `self` is not `Arc`-owned
    fn selfptr(&self) -> Option<Arc<Self>> {
        self.self_ref().upgrade()
    }

    /// Check whether `self` is currently owned through an `Arc`
    fn is_shared(&self) -> bool {
        self.self_ref().strong_count() > 0
    }
}
