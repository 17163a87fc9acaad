use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
	Int8,
	Int16,
	Int32,
	Int64,

	Uint8,
	Uint16,
	Uint32,
	Uint64,

	Float,
	Double,

	Undefined,
}

impl AttributeType {
	pub fn element_size(&self) -> usize {
		match self {
			AttributeType::Int8 | AttributeType::Uint8 => 1,
			AttributeType::Int16 | AttributeType::Uint16 => 2,
			AttributeType::Int32 | AttributeType::Uint32 | AttributeType::Float => 4,
			AttributeType::Int64 | AttributeType::Uint64 | AttributeType::Double => 8,
			AttributeType::Undefined => 1,
		}
	}
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
	pub name: String,
	#[serde(default)]
	pub description: String,
	pub size: usize,
	pub num_elements: usize,
	pub element_size: usize,
	pub r#type: AttributeType,
}

impl Attribute {
	pub fn new(name: &str, r#type: AttributeType, num_elements: usize) -> Attribute {
		let element_size = r#type.element_size();
		Attribute {
			name: name.to_string(),
			description: String::new(),
			size: element_size * num_elements,
			num_elements,
			element_size,
			r#type,
		}
	}

	/// Quantized position as written to the octree data file.
	pub fn position() -> Attribute {
		Attribute::new("position", AttributeType::Int32, 3)
	}
}

/// The per-point attribute schema carried next to positions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
	pub list: Vec<Attribute>,
	pub bytes: usize,
}

impl Attributes {
	pub fn new() -> Attributes {
		Attributes {
			list: Vec::new(),
			bytes: 0,
		}
	}

	pub fn from_attributes(attributes: Vec<Attribute>) -> Attributes {
		let bytes = attributes.iter().map(|attribute| attribute.size).sum();
		Attributes {
			list: attributes,
			bytes,
		}
	}

	pub fn get_offset(&self, name: &str) -> Option<usize> {
		let mut offset = 0;

		for attribute in &self.list {
			if attribute.name == name {
				return Some(offset);
			}

			offset += attribute.size;
		}

		None
	}

	pub fn get(&self, name: &str) -> Option<&Attribute> {
		self.list.iter().find(|attribute| attribute.name == name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn offsets_follow_declaration_order() {
		let attributes = Attributes::from_attributes(vec![
			Attribute::new("rgba", AttributeType::Uint8, 4),
			Attribute::new("intensity", AttributeType::Uint16, 1),
		]);

		assert_eq!(attributes.bytes, 6);
		assert_eq!(attributes.get_offset("rgba"), Some(0));
		assert_eq!(attributes.get_offset("intensity"), Some(4));
		assert_eq!(attributes.get_offset("classification"), None);
		assert_eq!(attributes.get("intensity").map(|a| a.element_size), Some(2));
	}

	#[test]
	fn serializes_type_names() {
		let json = serde_json::to_string(&Attribute::position()).unwrap();
		assert!(json.contains("\"type\":\"int32\""));
		assert!(json.contains("\"numElements\":3"));
	}
}
