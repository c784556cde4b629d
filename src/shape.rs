use serde::Deserialize;

/// Dense row-major shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Shape {
    pub dims: Vec<usize>,
}

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn vector(n: usize) -> Self {
        Self { dims: vec![n] }
    }

    /// Total number of elements. A rank-0 shape holds one element.
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Collapse to `(rows, cols)`: every leading dim folds into rows,
    /// the innermost dim is cols.
    pub fn as_matrix(&self) -> (usize, usize) {
        match self.dims.split_last() {
            None => (1, 1),
            Some((&cols, lead)) => (lead.iter().product(), cols),
        }
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_flat() {
        let s = Shape::new(vec![4, 5]);

        assert_eq!(s.size(), 20);
        assert_eq!(s.rank(), 2);
        assert_eq!(s.to_string(), "(4,5)");
    }

    #[test]
    fn scalar_holds_one_element() {
        let s = Shape::scalar();
        assert_eq!(s.size(), 1);
        assert_eq!(s.rank(), 0);
        assert_eq!(s.as_matrix(), (1, 1));
        assert_eq!(s.to_string(), "()");
    }

    #[test]
    fn zero_dim_makes_empty() {
        let s = Shape::new(vec![3, 0, 2]);
        assert!(s.is_empty());
        assert_eq!(s.size(), 0);
    }

    #[test]
    fn matrix_view_folds_leading_dims() {
        assert_eq!(Shape::new(vec![2, 3, 4]).as_matrix(), (6, 4));
        assert_eq!(Shape::vector(9).as_matrix(), (1, 9));
    }
}
