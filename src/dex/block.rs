//! Byte-layout primitives shared by dex sections.
//!
//! Everything that contributes bytes to a section implements [`Block`].
//! Layout is recomputed with [`Block::refresh`]: a parent walks its children
//! in slot order, handing each one the absolute byte position it will occupy
//! and collecting the position one past its end. Pool-index renumbering is
//! done through [`Block::visit_integers`], which walks embedded 32-bit
//! references in the same deterministic order and allows in-place
//! replacement.

/// Visitor for embedded 32-bit pool references (string/type/field/method
/// indices). Return `Some(new)` to replace the visited value, `None` to keep
/// it.
pub trait IntegerVisitor {
    fn visit(&mut self, value: u32) -> Option<u32>;
}

pub trait Block {
    /// Current byte size of this block.
    fn size(&self) -> usize;

    /// Recompute layout given the absolute byte position of this block's
    /// first byte. Returns the position one past the block's end.
    fn refresh(&mut self, position: usize) -> usize {
        position + self.size()
    }

    fn visit_integers(&mut self, _visitor: &mut dyn IntegerVisitor) {}
}

/// An ordered array of child blocks laid out contiguously.
#[derive(Debug, Default)]
pub struct BlockArray<T: Block> {
    items: Vec<T>,
}

impl<T: Block> BlockArray<T> {
    pub fn new() -> Self {
        BlockArray { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn insert(&mut self, index: usize, item: T) {
        self.items.insert(index, item);
    }

    pub fn insert_all(&mut self, index: usize, items: Vec<T>) {
        self.items.splice(index..index, items);
    }

    /// Removes and returns the child at `index`.
    pub fn remove(&mut self, index: usize) -> T {
        self.items.remove(index)
    }

    /// Substitutes the child at `index`, returning the old one.
    pub fn set_item(&mut self, index: usize, item: T) -> T {
        std::mem::replace(&mut self.items[index], item)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.items
    }
}

impl<T: Block> Block for BlockArray<T> {
    fn size(&self) -> usize {
        self.items.iter().map(|item| item.size()).sum()
    }

    fn refresh(&mut self, position: usize) -> usize {
        let mut pos = position;
        for item in &mut self.items {
            pos = item.refresh(pos);
        }
        pos
    }

    fn visit_integers(&mut self, visitor: &mut dyn IntegerVisitor) {
        for item in &mut self.items {
            item.visit_integers(visitor);
        }
    }
}

/// Zero padding that brings a cumulative byte position up to an alignment
/// boundary. `align` is idempotent: the recorded size depends only on the
/// position passed in, never on the previously recorded size.
#[derive(Debug)]
pub struct DexPositionAlign {
    alignment: usize,
    size: usize,
}

impl DexPositionAlign {
    pub fn new() -> Self {
        Self::with_alignment(2)
    }

    pub fn with_alignment(alignment: usize) -> Self {
        DexPositionAlign { alignment, size: 0 }
    }

    /// Recomputes the padding needed to reach the next boundary after
    /// `position` and records it. Returns the padding size.
    pub fn align(&mut self, position: usize) -> usize {
        let rem = position % self.alignment;
        self.size = if rem == 0 { 0 } else { self.alignment - rem };
        self.size
    }

    /// The last-computed padding length.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn write(&self, buffer: &mut Vec<u8>) -> usize {
        for _ in 0..self.size {
            buffer.push(0);
        }
        self.size
    }
}

impl Default for DexPositionAlign {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for DexPositionAlign {
    fn size(&self) -> usize {
        self.size
    }

    fn refresh(&mut self, position: usize) -> usize {
        position + self.align(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Raw(Vec<u8>);

    impl Block for Raw {
        fn size(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn align_is_idempotent() {
        let mut align = DexPositionAlign::with_alignment(4);
        assert_eq!(align.align(6), 2);
        assert_eq!(align.align(6), 2);
        assert_eq!(align.size(), 2);
        assert_eq!(align.align(8), 0);
        assert_eq!(align.size(), 0);
    }

    #[test]
    fn array_layout_is_contiguous() {
        let mut array = BlockArray::new();
        array.push(Raw(vec![0; 3]));
        array.push(Raw(vec![0; 5]));
        assert_eq!(array.size(), 8);
        assert_eq!(array.refresh(16), 24);
    }

    #[test]
    fn align_block_pads_array_end() {
        let mut array = BlockArray::new();
        array.push(Raw(vec![0; 6]));
        let end = array.refresh(0);
        let mut align = DexPositionAlign::with_alignment(4);
        assert_eq!(align.refresh(end), 8);
        assert_eq!(align.size(), 2);
    }
}
