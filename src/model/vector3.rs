use std::ops;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
	pub x: f64,
	pub y: f64,
	pub z: f64,
}

impl Vector3 {
	pub fn new(x: f64, y: f64, z: f64) -> Vector3 {
		Vector3 { x, y, z }
	}

	pub fn infinity() -> Vector3 {
		Vector3 {
			x: f64::INFINITY,
			y: f64::INFINITY,
			z: f64::INFINITY,
		}
	}

	pub fn empty() -> Vector3 {
		Vector3 {
			x: 0.0,
			y: 0.0,
			z: 0.0,
		}
	}

	pub fn from_array(values: [f64; 3]) -> Vector3 {
		Vector3 {
			x: values[0],
			y: values[1],
			z: values[2],
		}
	}

	pub fn to_array(&self) -> [f64; 3] {
		[self.x, self.y, self.z]
	}

	pub fn squared_distance_to(&self, other: &Vector3) -> f64 {
		let dx = other.x - self.x;
		let dy = other.y - self.y;
		let dz = other.z - self.z;

		dx * dx + dy * dy + dz * dz
	}

	pub fn distance_to(&self, other: &Vector3) -> f64 {
		self.squared_distance_to(other).sqrt()
	}

	pub fn length(&self) -> f64 {
		(self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
	}

	pub fn max_component(&self) -> f64 {
		self.x.max(self.y).max(self.z)
	}

	pub fn min_component(&self) -> f64 {
		self.x.min(self.y).min(self.z)
	}

	pub fn min(&self, other: &Vector3) -> Vector3 {
		Vector3 {
			x: self.x.min(other.x),
			y: self.y.min(other.y),
			z: self.z.min(other.z),
		}
	}

	pub fn max(&self, other: &Vector3) -> Vector3 {
		Vector3 {
			x: self.x.max(other.x),
			y: self.y.max(other.y),
			z: self.z.max(other.z),
		}
	}

	pub fn is_finite(&self) -> bool {
		self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
	}
}

impl ops::Mul<Vector3> for Vector3 {
	type Output = Vector3;

	fn mul(self, _rhs: Vector3) -> Vector3 {
		Vector3 {
			x: self.x * _rhs.x,
			y: self.y * _rhs.y,
			z: self.z * _rhs.z,
		}
	}
}

impl ops::Mul<f64> for Vector3 {
	type Output = Vector3;

	fn mul(self, scalar: f64) -> Vector3 {
		Vector3 {
			x: self.x * scalar,
			y: self.y * scalar,
			z: self.z * scalar,
		}
	}
}

impl ops::Sub<Vector3> for Vector3 {
	type Output = Vector3;

	fn sub(self, _rhs: Vector3) -> Vector3 {
		Vector3 {
			x: self.x - _rhs.x,
			y: self.y - _rhs.y,
			z: self.z - _rhs.z,
		}
	}
}

impl ops::Add<Vector3> for Vector3 {
	type Output = Vector3;

	fn add(self, _rhs: Vector3) -> Vector3 {
		Vector3 {
			x: self.x + _rhs.x,
			y: self.y + _rhs.y,
			z: self.z + _rhs.z,
		}
	}
}

impl ops::Add<f64> for Vector3 {
	type Output = Vector3;
	fn add(self, scalar: f64) -> Vector3 {
		Vector3 {
			x: self.x + scalar,
			y: self.y + scalar,
			z: self.z + scalar,
		}
	}
}
