use std::ops::{Index, IndexMut};

use glam::UVec2;

/// Row-major 2d storage indexed by (x, y)
#[derive(derive_more::Deref, derive_more::DerefMut, Debug, Clone, PartialEq, Eq)]
pub struct UVecVec<T>(pub Vec<Vec<T>>);

impl<T: Clone> UVecVec<T> {
    pub fn filled(dims: UVec2, value: T) -> Self {
        return Self(vec![vec![value; dims.x as usize]; dims.y as usize]);
    }
}

impl<T> UVecVec<T> {
    pub fn get(&self, index: UVec2) -> Option<&T> {
        return self.0.get(index.y as usize)?.get(index.x as usize);
    }

    pub fn get_mut(&mut self, index: UVec2) -> Option<&mut T> {
        return self.0.get_mut(index.y as usize)?.get_mut(index.x as usize);
    }

    /// Cells in row-major order
    pub fn iter_cells(&self) -> impl Iterator<Item = &T> + '_ {
        return self.0.iter().flatten();
    }
}

impl<T> Index<UVec2> for UVecVec<T> {
    type Output = T;
    fn index(&self, index: UVec2) -> &Self::Output {
        return &self.0[index.y as usize][index.x as usize]
    }
}

impl<T> IndexMut<UVec2> for UVecVec<T> {
    fn index_mut(&mut self, index: UVec2) -> &mut Self::Output {
        return &mut self.0[index.y as usize][index.x as usize]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_is_x_then_y() {
        let mut v = UVecVec::filled(UVec2::new(3, 2), 0);
        v[UVec2::new(2, 1)] = 7;
        assert_eq!(v.0[1][2], 7);
        assert_eq!(v.get(UVec2::new(2, 1)), Some(&7));
        assert_eq!(v.get(UVec2::new(3, 0)), None);
        assert_eq!(v.iter_cells().copied().collect::<Vec<_>>(), vec![0, 0, 0, 0, 0, 7]);
    }
}
