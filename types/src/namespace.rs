use snap_plugin_error::{PluginError, Result};
use snap_plugin_proto::v1;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Value carried by a dynamic element until a concrete instance is bound to it.
pub const DYNAMIC_WILDCARD: &str = "*";

/// One segment of a metric namespace.
///
/// An element is dynamic iff its `name` is non-empty. The name identifies the
/// logical role of the wildcard (e.g. "device-id") while `value` holds the
/// concrete segment used when addressing a specific metric instance.
#[derive(Debug, Clone, Default)]
pub struct NamespaceElement {
    value: String,
    name: String,
    description: String,
}

impl NamespaceElement {
    pub fn new_static(value: impl Into<String>, description: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(PluginError::InvalidElement(
                "static element requires a non-empty value".to_string(),
            ));
        }

        Ok(Self {
            value,
            name: String::new(),
            description: description.into(),
        })
    }

    pub fn new_dynamic(name: impl Into<String>, description: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(PluginError::InvalidElement(
                "dynamic element requires a non-empty name".to_string(),
            ));
        }

        Ok(Self {
            value: DYNAMIC_WILDCARD.to_string(),
            name,
            description: description.into(),
        })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_dynamic(&self) -> bool {
        !self.name.is_empty()
    }
}

// Identity is (value, name); the description is documentation only.
impl PartialEq for NamespaceElement {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.name == other.name
    }
}

impl Eq for NamespaceElement {}

impl Hash for NamespaceElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
        self.name.hash(state);
    }
}

impl From<&NamespaceElement> for v1::NamespaceElement {
    fn from(element: &NamespaceElement) -> Self {
        v1::NamespaceElement {
            value: element.value.clone(),
            name: element.name.clone(),
            description: element.description.clone(),
        }
    }
}

impl TryFrom<v1::NamespaceElement> for NamespaceElement {
    type Error = PluginError;

    fn try_from(element: v1::NamespaceElement) -> Result<Self> {
        if element.value.is_empty() {
            return Err(PluginError::InvalidElement(format!(
                "namespace element '{}' has an empty value",
                element.name
            )));
        }

        Ok(Self {
            value: element.value,
            name: element.name,
            description: element.description,
        })
    }
}

/// Ordered path of elements identifying a metric kind.
///
/// Element order defines the addressing order, so two namespaces are equal only
/// when their elements are equal position by position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Namespace {
    elements: Vec<NamespaceElement>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a namespace made only of static elements.
    pub fn from_static<I, S>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ns = Self::new();
        for value in values {
            ns.append_static(value)?;
        }
        Ok(ns)
    }

    pub fn append_static(&mut self, value: impl Into<String>) -> Result<&mut Self> {
        self.append_static_with_description(value, "")
    }

    pub fn append_static_with_description(
        &mut self,
        value: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<&mut Self> {
        self.elements
            .push(NamespaceElement::new_static(value, description)?);
        Ok(self)
    }

    pub fn append_dynamic(&mut self, name: impl Into<String>) -> Result<&mut Self> {
        self.append_dynamic_with_description(name, "")
    }

    pub fn append_dynamic_with_description(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<&mut Self> {
        self.elements
            .push(NamespaceElement::new_dynamic(name, description)?);
        Ok(self)
    }

    /// Binds a concrete value to the dynamic element at `index`.
    pub fn set_dynamic_value(&mut self, index: usize, value: impl Into<String>) -> Result<&mut Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(PluginError::InvalidElement(format!(
                "empty value for dynamic element at index {index}"
            )));
        }

        match self.elements.get_mut(index) {
            Some(element) if element.is_dynamic() => {
                element.value = value;
                Ok(self)
            }
            Some(element) => Err(PluginError::InvalidElement(format!(
                "element '{}' at index {index} is static",
                element.value
            ))),
            None => Err(PluginError::InvalidElement(format!(
                "index {index} is out of range for a namespace of {} elements",
                self.elements.len()
            ))),
        }
    }

    pub fn elements(&self) -> &[NamespaceElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn is_dynamic(&self) -> bool {
        self.elements.iter().any(NamespaceElement::is_dynamic)
    }

    /// Positions of all dynamic elements, in element order.
    pub fn dynamic_indexes(&self) -> Vec<usize> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, element)| element.is_dynamic())
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Joins element values, with the separator also leading the first element.
    pub fn join(&self, separator: &str) -> String {
        let mut path = String::new();
        for element in &self.elements {
            path.push_str(separator);
            path.push_str(&element.value);
        }
        path
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join("/"))
    }
}

impl From<&Namespace> for Vec<v1::NamespaceElement> {
    fn from(ns: &Namespace) -> Self {
        ns.elements.iter().map(v1::NamespaceElement::from).collect()
    }
}

impl TryFrom<Vec<v1::NamespaceElement>> for Namespace {
    type Error = PluginError;

    fn try_from(elements: Vec<v1::NamespaceElement>) -> Result<Self> {
        let elements = elements
            .into_iter()
            .map(NamespaceElement::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { elements })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic_namespace() -> Namespace {
        let mut ns = Namespace::from_static(["foo"]).unwrap();
        ns.append_dynamic("dynamo1")
            .unwrap()
            .append_static("bar")
            .unwrap()
            .append_dynamic("dynamo2")
            .unwrap();
        ns
    }

    #[test]
    fn test_dynamic_indexes() {
        let static_ns = Namespace::from_static(["foo", "bar"]).unwrap();
        assert_eq!(static_ns.dynamic_indexes(), Vec::<usize>::new());
        assert!(!static_ns.is_dynamic());

        let dynamic_ns = dynamic_namespace();
        assert_eq!(dynamic_ns.dynamic_indexes(), vec![1, 3]);
        assert!(dynamic_ns.is_dynamic());
    }

    #[test]
    fn test_dynamic_indexes_follow_appends() {
        let mut ns = Namespace::new();
        assert!(ns.dynamic_indexes().is_empty());

        ns.append_dynamic("host").unwrap();
        assert_eq!(ns.dynamic_indexes(), vec![0]);

        ns.append_static("cpu").unwrap().append_static("load").unwrap();
        ns.append_dynamic("core").unwrap();
        assert_eq!(ns.dynamic_indexes(), vec![0, 3]);
    }

    #[test]
    fn test_display() {
        let ns = Namespace::from_static(["foo", "bar"]).unwrap();
        assert_eq!(ns.to_string(), "/foo/bar");
        assert_eq!(ns.join("."), ".foo.bar");

        assert_eq!(dynamic_namespace().to_string(), "/foo/*/bar/*");
        assert_eq!(Namespace::new().to_string(), "");
    }

    #[test]
    fn test_invalid_elements() {
        let mut ns = Namespace::new();
        assert!(matches!(
            ns.append_static(""),
            Err(PluginError::InvalidElement(_))
        ));
        assert!(matches!(
            ns.append_dynamic(""),
            Err(PluginError::InvalidElement(_))
        ));
        assert!(ns.is_empty());
    }

    #[test]
    fn test_equality_ignores_description() {
        let mut a = Namespace::new();
        a.append_static_with_description("intel", "vendor").unwrap();
        let b = Namespace::from_static(["intel"]).unwrap();
        assert_eq!(a, b);

        let mut c = Namespace::new();
        c.append_dynamic("intel").unwrap();
        assert_ne!(b, c);

        let reordered = Namespace::from_static(["bar", "foo"]).unwrap();
        assert_ne!(reordered, Namespace::from_static(["foo", "bar"]).unwrap());
    }

    #[test]
    fn test_set_dynamic_value() {
        let mut ns = dynamic_namespace();
        ns.set_dynamic_value(1, "sda").unwrap();
        assert_eq!(ns.to_string(), "/foo/sda/bar/*");
        assert_eq!(ns.elements()[1].name(), "dynamo1");
        assert!(ns.is_dynamic());

        assert!(matches!(
            ns.set_dynamic_value(0, "x"),
            Err(PluginError::InvalidElement(_))
        ));
        assert!(matches!(
            ns.set_dynamic_value(9, "x"),
            Err(PluginError::InvalidElement(_))
        ));
        assert!(matches!(
            ns.set_dynamic_value(3, ""),
            Err(PluginError::InvalidElement(_))
        ));
    }

    #[test]
    fn test_wire_conversion() {
        let ns = dynamic_namespace();
        let wire: Vec<v1::NamespaceElement> = (&ns).into();
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[1].name, "dynamo1");
        assert_eq!(wire[1].value, DYNAMIC_WILDCARD);

        let decoded = Namespace::try_from(wire).unwrap();
        assert_eq!(decoded, ns);

        let bad = vec![v1::NamespaceElement::default()];
        assert!(Namespace::try_from(bad).is_err());
    }
}
