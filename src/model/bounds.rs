use crate::error::{ConverterError, Result};
use crate::model::vector3::Vector3;
use ord_subset::OrdSubsetIterExt;

/// Axis aligned box, `size = max - min`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Vector3,
    pub max: Vector3,
}

impl BoundingBox {
    pub fn new(min: Vector3, max: Vector3) -> BoundingBox {
        BoundingBox { min, max }
    }

    pub fn empty() -> BoundingBox {
        BoundingBox {
            min: Vector3::infinity(),
            max: Vector3::infinity() * -1.0,
        }
    }

    pub fn expand(&mut self, point: &Vector3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn size(&self) -> Vector3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vector3 {
        self.min + self.size() * 0.5
    }

    pub fn diagonal(&self) -> f64 {
        self.size().length()
    }

    /// Extends the box so that every axis matches the largest extent, keeping `min`.
    pub fn cubic(&self) -> BoundingBox {
        let max_size = self.size().max_component();
        BoundingBox::new(self.min, self.min + max_size)
    }

    /// Grid and octant math divide by the extent of every axis.
    pub fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(ConverterError::Config(format!(
                "bounding box {:?} - {:?} is not finite",
                self.min.to_array(),
                self.max.to_array()
            )));
        }

        let size = self.size();
        if size.x <= 0.0 || size.y <= 0.0 || size.z <= 0.0 {
            return Err(ConverterError::Config(format!(
                "bounding box has a zero-length axis: size {:?}",
                size.to_array()
            )));
        }

        Ok(())
    }

    pub fn contains(&self, point: &Vector3) -> bool {
        point.x >= self.min.x
            && point.y >= self.min.y
            && point.z >= self.min.z
            && point.x <= self.max.x
            && point.y <= self.max.y
            && point.z <= self.max.z
    }

    /// Octant of `point` relative to the box midpoint, `(x<<2)|(y<<1)|z`.
    /// A coordinate exactly on the midpoint belongs to the lower half.
    pub fn child_index_of(&self, point: &Vector3) -> usize {
        let size = self.size();
        let nx = (point.x - self.min.x) / size.x;
        let ny = (point.y - self.min.y) / size.y;
        let nz = (point.z - self.min.z) / size.z;

        let mut index = 0;
        if nx > 0.5 {
            index |= 0b100;
        }
        if ny > 0.5 {
            index |= 0b010;
        }
        if nz > 0.5 {
            index |= 0b001;
        }

        index
    }

    pub fn child_bounds(&self, index: usize) -> BoundingBox {
        let mut bbox = BoundingBox::empty();
        let center = self.center();

        if (index & 0b100) == 0 {
            bbox.min.x = self.min.x;
            bbox.max.x = center.x;
        } else {
            bbox.min.x = center.x;
            bbox.max.x = self.max.x;
        }

        if (index & 0b010) == 0 {
            bbox.min.y = self.min.y;
            bbox.max.y = center.y;
        } else {
            bbox.min.y = center.y;
            bbox.max.y = self.max.y;
        }

        if (index & 0b001) == 0 {
            bbox.min.z = self.min.z;
            bbox.max.z = center.z;
        } else {
            bbox.min.z = center.z;
            bbox.max.z = self.max.z;
        }

        bbox
    }

    /// Box of the node `name` (e.g. `"r063"`) inside the cube whose root is `"r"`.
    pub fn of_node(&self, name: &str) -> Result<BoundingBox> {
        let mut bbox = *self;
        for index in octant_path(name)? {
            bbox = bbox.child_bounds(index);
        }

        Ok(bbox)
    }
}

/// Octant digits of a node name, skipping the leading `r`.
pub fn octant_path(name: &str) -> Result<Vec<usize>> {
    let mut chars = name.chars();
    if chars.next() != Some('r') {
        return Err(ConverterError::UnknownNode(name.to_string()));
    }

    chars
        .map(|c| match c.to_digit(8) {
            Some(digit) => Ok(digit as usize),
            None => Err(ConverterError::UnknownNode(name.to_string())),
        })
        .collect()
}

pub fn find_bounds(points: &[Vector3]) -> Option<BoundingBox> {
    let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
    let zs: Vec<f64> = points.iter().map(|p| p.z).collect();

    Some(BoundingBox::new(
        Vector3::new(
            *xs.iter().ord_subset_min()?,
            *ys.iter().ord_subset_min()?,
            *zs.iter().ord_subset_min()?,
        ),
        Vector3::new(
            *xs.iter().ord_subset_max()?,
            *ys.iter().ord_subset_max()?,
            *zs.iter().ord_subset_max()?,
        ),
    ))
}
