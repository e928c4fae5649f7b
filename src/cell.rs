//! [`SegallocCell`] allows using [`Segalloc`] as a Rust allocator
//! for single-threaded unsynchronized access.
//!
//! See [`SegallocCell`].

use core::{
    alloc::Layout,
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

use allocator_api2::alloc::{AllocError, Allocator};

use crate::{Segalloc, ALIGNMENT};

/// [`SegallocCell`] implements [`Allocator`] without locking, but is [`!Sync`](Sync).
///
/// This type has similar semantics to a [`Cell`](core::cell::Cell).
///
/// Layouts aligned to more than [`ALIGNMENT`] are refused.
///
/// # Example
/// ```rust
/// # extern crate allocator_api2;
/// # extern crate segalloc;
/// use allocator_api2::vec::Vec;
/// use segalloc::{Segalloc, SegallocCell};
///
/// let mut arena = [0u64; 256];
/// let bytes = unsafe {
///     core::slice::from_raw_parts_mut(arena.as_mut_ptr().cast::<u8>(), 256 * 8)
/// };
/// let cell = SegallocCell::new(Segalloc::new(bytes).unwrap());
///
/// let mut my_vec = Vec::<u32, _>::with_capacity_in(42, &cell);
/// my_vec.push(123);
/// ```
///
/// # Safety
/// [`SegallocCell`]'s API does not expose references to the inner [`Segalloc`]
/// within an [`UnsafeCell`] and is `!Sync`, so it's safe to mutate the inner data
/// through a shared reference.
///
/// To help catch mistakes here, [`SegallocCell`] tracks borrows when
/// `debug_assertions` are enabled, similar to a [`RefCell`](core::cell::RefCell).
#[derive(Debug)]
pub struct SegallocCell<'s> {
    cell: UnsafeCell<Segalloc<'s>>,

    #[cfg(debug_assertions)]
    borrowed_at: core::cell::Cell<Option<&'static core::panic::Location<'static>>>,
}

impl<'s> SegallocCell<'s> {
    /// Create a new [`SegallocCell`].
    #[inline]
    pub const fn new(segalloc: Segalloc<'s>) -> Self {
        Self {
            cell: UnsafeCell::new(segalloc),

            #[cfg(debug_assertions)]
            borrowed_at: core::cell::Cell::new(None),
        }
    }

    /// Returns a mutable reference to the inner [`Segalloc`].
    #[inline]
    pub fn get_mut(&mut self) -> &mut Segalloc<'s> {
        self.cell.get_mut()
    }

    /// Consumes the [`SegallocCell`], returning the inner [`Segalloc`].
    #[inline]
    pub fn into_inner(self) -> Segalloc<'s> {
        self.cell.into_inner()
    }

    /// Borrow the inner [`Segalloc`] mutably.
    ///
    /// # Safety
    /// Creating aliasing references must be avoided.
    /// [`SegallocCell`] ensures against this in the following ways:
    ///
    /// - [`SegallocCell`]'s functions do not call [`SegallocCell::borrow`] more than once.
    /// - [`SegallocCell`]'s functions do not call another [`SegallocCell`] function
    ///     while holding a [`BorrowedSegalloc`].
    /// - [`SegallocCell`]'s API does not expose references to the inner [`Segalloc`].
    #[inline]
    #[track_caller]
    unsafe fn borrow(&self) -> BorrowedSegalloc<'_, 's> {
        #[cfg(debug_assertions)]
        {
            if let Some(borrowed_at) = self.borrowed_at.take() {
                panic!(
                    "Tried to borrow the Segalloc, was borrowed previously at {}:{}:{}.",
                    borrowed_at.file(),
                    borrowed_at.line(),
                    borrowed_at.column(),
                );
            }

            self.borrowed_at.set(Some(core::panic::Location::caller()));
        }

        BorrowedSegalloc {
            ptr: unsafe { NonNull::new_unchecked(self.cell.get()) },
            _phantom: PhantomData,

            #[cfg(debug_assertions)]
            borrow_release: &self.borrowed_at,
        }
    }

    /// Obtain a copy of the inner allocation statistics.
    #[cfg(feature = "counters")]
    #[inline]
    #[track_caller]
    pub fn counters(&self) -> crate::Counters {
        unsafe {
            // SAFETY: See `Self::borrow`'s safety docs
            *self.borrow().counters()
        }
    }

    /// Scan the inner [`Segalloc`]'s heap. See [`Segalloc::scan`].
    #[inline]
    #[track_caller]
    pub fn scan(&self) -> crate::Report {
        unsafe {
            // SAFETY: See `Self::borrow`'s safety docs
            self.borrow().scan()
        }
    }

    /// Allocates `layout.size()` bytes, returning the payload's address.
    ///
    /// # Safety
    /// `layout.size()` must be nonzero.
    #[track_caller]
    unsafe fn allocate_nonzero(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.align() > ALIGNMENT {
            return Err(AllocError);
        }

        // SAFETY: See `Self::borrow`'s safety docs
        let mut segalloc = self.borrow();
        let payload = segalloc.allocate(layout.size()).map_err(|_| AllocError)?;
        segalloc.payload_ptr(payload).ok_or(AllocError)
    }
}

/// A mutable borrow of the [`Segalloc`] inside a [`SegallocCell`].
struct BorrowedSegalloc<'b, 's> {
    ptr: NonNull<Segalloc<'s>>,
    _phantom: PhantomData<&'b mut Segalloc<'s>>,

    #[cfg(debug_assertions)]
    borrow_release: &'b core::cell::Cell<Option<&'static core::panic::Location<'static>>>,
}

impl<'s> Deref for BorrowedSegalloc<'_, 's> {
    type Target = Segalloc<'s>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe { self.ptr.as_ref() }
    }
}

impl<'s> DerefMut for BorrowedSegalloc<'_, 's> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { self.ptr.as_mut() }
    }
}

#[cfg(debug_assertions)]
impl Drop for BorrowedSegalloc<'_, '_> {
    #[inline]
    fn drop(&mut self) {
        self.borrow_release.set(None);
    }
}

#[inline]
fn dangling(layout: Layout) -> NonNull<[u8]> {
    // SAFETY: alignments are never zero
    let dangling = unsafe { NonNull::new_unchecked(layout.align() as *mut u8) };
    NonNull::slice_from_raw_parts(dangling, 0)
}

unsafe impl Allocator for SegallocCell<'_> {
    #[inline]
    #[track_caller]
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() == 0 {
            return Ok(dangling(layout));
        }

        // SAFETY: Ensured the size is not zero above.
        let ptr = unsafe { self.allocate_nonzero(layout)? };
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    #[inline]
    #[track_caller]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            // SAFETY: See `Self::borrow`'s safety docs
            let mut segalloc = self.borrow();
            let payload = segalloc.payload_of(ptr.as_ptr());
            segalloc.release(payload);
        }
    }

    #[track_caller]
    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(new_layout.size() >= old_layout.size());

        if old_layout.size() == 0 {
            return Allocator::allocate(self, new_layout);
        }
        if new_layout.align() > ALIGNMENT {
            return Err(AllocError);
        }

        // SAFETY: See `Self::borrow`'s safety docs
        let mut segalloc = self.borrow();
        let payload = segalloc.payload_of(ptr.as_ptr()).ok_or(AllocError)?;
        let resized = segalloc.resize(payload, new_layout.size()).map_err(|_| AllocError)?;
        let ptr = segalloc.payload_ptr(resized).ok_or(AllocError)?;

        Ok(NonNull::slice_from_raw_parts(ptr, new_layout.size()))
    }

    #[track_caller]
    unsafe fn shrink(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(new_layout.size() <= old_layout.size());

        if new_layout.size() == 0 {
            if old_layout.size() > 0 {
                self.deallocate(ptr, old_layout);
            }
            return Ok(dangling(new_layout));
        }
        if new_layout.align() > ALIGNMENT {
            return Err(AllocError);
        }

        // SAFETY: See `Self::borrow`'s safety docs
        let mut segalloc = self.borrow();
        let payload = segalloc.payload_of(ptr.as_ptr()).ok_or(AllocError)?;
        let resized = segalloc.resize(payload, new_layout.size()).map_err(|_| AllocError)?;
        let ptr = segalloc.payload_ptr(resized).ok_or(AllocError)?;

        Ok(NonNull::slice_from_raw_parts(ptr, new_layout.size()))
    }
}
