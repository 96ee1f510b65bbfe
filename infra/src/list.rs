// Copyright (c) 2025 vivo Mobile Communication Co., Ltd.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// We are not using Pin APIs here since Pin APIs are unergonomic and
// hard to learn for ordinary developers. Nodes are embedded in owner
// structs whose addresses must be stable while linked; the container
// itself holds no self-references and is movable while empty. It is
// **NOT** concurrent safe.

use crate::intrusive::Adapter;
use core::{marker::PhantomData, ptr::NonNull};

#[derive(Debug)]
pub struct ListHead<T, A: Adapter> {
    pub prev: Option<NonNull<ListHead<T, A>>>,
    pub next: Option<NonNull<ListHead<T, A>>>,
    _t: PhantomData<T>,
    _a: PhantomData<A>,
}

// Not derived: the derive would demand `T: Default` from every owner.
impl<T, A: Adapter> Default for ListHead<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: Adapter> ListHead<T, A> {
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            _t: PhantomData,
            _a: PhantomData,
        }
    }

    pub fn owner(&self) -> &T {
        let ptr = self as *const _ as *const u8;
        let base = unsafe { ptr.sub(A::offset()) as *const T };
        unsafe { &*base }
    }

    pub fn owner_ptr(&self) -> NonNull<T> {
        let ptr = self as *const _ as *const u8;
        let base = unsafe { ptr.sub(A::offset()) as *const T as *mut T };
        unsafe { NonNull::new_unchecked(base) }
    }

    pub fn is_detached(&self) -> bool {
        self.prev.is_none() && self.next.is_none()
    }
}

/// An intrusive FIFO of borrowed nodes. The list does not own its
/// elements; whoever detaches a node is responsible for it.
#[derive(Debug)]
pub struct List<T, A: Adapter> {
    head: Option<NonNull<ListHead<T, A>>>,
    tail: Option<NonNull<ListHead<T, A>>>,
    len: usize,
}

impl<T, A: Adapter> Default for List<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: Adapter> List<T, A> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn push_back(&mut self, mut node: NonNull<ListHead<T, A>>) -> bool {
        unsafe {
            if !node.as_ref().is_detached() {
                return false;
            }
            node.as_mut().prev = self.tail;
            node.as_mut().next = None;
            match self.tail {
                Some(mut tail) => tail.as_mut().next = Some(node),
                None => self.head = Some(node),
            }
            self.tail = Some(node);
            self.len += 1;
            true
        }
    }

    pub fn pop_front(&mut self) -> Option<NonNull<T>> {
        let mut first = self.head?;
        unsafe {
            self.head = first.as_ref().next;
            match self.head {
                Some(mut next) => next.as_mut().prev = None,
                None => self.tail = None,
            }
            first.as_mut().prev = None;
            first.as_mut().next = None;
            self.len -= 1;
            Some(first.as_ref().owner_ptr())
        }
    }

    pub fn iter(&self) -> ListIterator<'_, T, A> {
        ListIterator {
            next: self.head,
            _list: PhantomData,
        }
    }
}

pub struct ListIterator<'a, T, A: Adapter> {
    next: Option<NonNull<ListHead<T, A>>>,
    _list: PhantomData<&'a List<T, A>>,
}

impl<'a, T, A: Adapter> Iterator for ListIterator<'a, T, A> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        unsafe {
            self.next = current.as_ref().next;
            Some(current.as_ref().owner_ptr())
        }
    }
}
