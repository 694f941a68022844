//! Tracks the relationships between classes and interfaces.
//!
//! Assignability queries during crossover checking need one unified view of
//! every class the analyzed methods mention, JDK types included. Class data is
//! arena-allocated and interned by name, so classes can freely reference each
//! other and lookups hand out plain references.

use super::{BinaryName, Name, RefType};
use crate::util::RefId;
use elsa::map::FrozenMap;
use elsa::FrozenVec;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::fmt::Debug;
use typed_arena::Arena;

/// Arenas owning the class data referenced from a [`ClassGraph`]
pub struct ClassGraphArenas<'g> {
    class_arena: Arena<ClassData<'g>>,
}

impl<'g> ClassGraphArenas<'g> {
    pub fn new() -> Self {
        ClassGraphArenas {
            class_arena: Arena::new(),
        }
    }
}

impl<'g> Default for ClassGraphArenas<'g> {
    fn default() -> Self {
        Self::new()
    }
}

/// Graph of classes/interfaces and their subtyping edges
pub struct ClassGraph<'g> {
    arenas: &'g ClassGraphArenas<'g>,
    classes: FrozenMap<&'g str, &'g ClassData<'g>>,
}

impl<'g> ClassGraph<'g> {
    /// New empty graph
    pub fn new(arenas: &'g ClassGraphArenas<'g>) -> Self {
        ClassGraph {
            arenas,
            classes: FrozenMap::new(),
        }
    }

    pub fn lookup_class(&'g self, name: &BinaryName) -> Option<&'g ClassData<'g>> {
        self.classes.get(name.as_str())
    }

    /// Add a new class to the class graph
    pub fn add_class(&'g self, data: ClassData<'g>) -> &'g ClassData<'g> {
        let data = &*self.arenas.class_arena.alloc(data);
        self.classes.insert(data.name.as_str(), data);
        data
    }

    /// Add standard types to the class graph
    pub fn insert_java_library_types(&'g self) -> JavaClasses<'g> {
        JavaClasses::add_to_graph(self)
    }
}

/// One class or interface in the graph
pub struct ClassData<'g> {
    /// Name of the class
    pub name: BinaryName,

    /// Superclass is only ever missing for `java/lang/Object` itself
    pub superclass: Option<&'g ClassData<'g>>,

    /// Interfaces implemented (or super-interfaces)
    pub interfaces: FrozenVec<&'g ClassData<'g>>,

    /// Is this an interface?
    pub is_interface: bool,
}

impl<'g> ClassData<'g> {
    pub fn new(
        name: BinaryName,
        superclass: &'g ClassData<'g>,
        is_interface: bool,
    ) -> ClassData<'g> {
        ClassData {
            name,
            superclass: Some(superclass),
            interfaces: FrozenVec::new(),
            is_interface,
        }
    }
}

impl<'g> PartialEq for ClassData<'g> {
    fn eq(&self, other: &ClassData<'g>) -> bool {
        self.name == other.name
    }
}

impl<'g> Eq for ClassData<'g> {}

impl<'g> Debug for ClassData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_str())
    }
}

/// Subtyping relationship between types
pub trait Assignable {
    /// Is the first type assignable to the second?
    fn is_assignable(&self, super_type: &Self) -> bool;
}

/// This does a traversal of super types in the class graph to determine assignability
impl<'a, 'g> Assignable for &'a ClassData<'g> {
    fn is_assignable(&self, super_type: &&'a ClassData<'g>) -> bool {
        let mut supertypes_to_visit: Vec<&ClassData<'g>> = vec![*self];
        let mut dont_revisit: HashSet<RefId<'_, ClassData<'g>>> = HashSet::new();
        dont_revisit.insert(RefId(*self));

        // Optimization: if the super type is a class, then skip visiting interfaces
        let super_is_class: bool = !super_type.is_interface;

        while let Some(class_data) = supertypes_to_visit.pop() {
            if std::ptr::eq(class_data, *super_type) {
                return true;
            }

            // Enqueue next types to visit
            if let Some(superclass) = class_data.superclass {
                if dont_revisit.insert(RefId(superclass)) {
                    supertypes_to_visit.push(superclass);
                }
            }
            if !super_is_class {
                for interface in class_data.interfaces.iter() {
                    if dont_revisit.insert(RefId(interface)) {
                        supertypes_to_visit.push(interface);
                    }
                }
            }
        }

        false
    }
}

/// This matches the semantics of the prolog predicate `isJavaAssignable(sub_type, super_type)` in
/// the JVM verifier specification.
impl<'a, 'g> Assignable for ResolvedRefType<'a, 'g> {
    fn is_assignable(&self, super_type: &ResolvedRefType<'a, 'g>) -> bool {
        match (self, super_type) {
            // Special superclass and interfaces of all arrays
            (
                ResolvedRefType::PrimitiveArray { .. } | ResolvedRefType::ObjectArray { .. },
                ResolvedRefType::Object(object_type),
            ) => is_array_type_assignable(&object_type.name),

            // Primitive arrays must match in dimension and type
            (
                ResolvedRefType::PrimitiveArray {
                    dimensions: d1,
                    element: e1,
                },
                ResolvedRefType::PrimitiveArray {
                    dimensions: d2,
                    element: e2,
                },
            ) => d1 == d2 && e1 == e2,

            // Higher dimensional primitive arrays can be subtypes of object arrays
            (
                ResolvedRefType::PrimitiveArray { dimensions: d1, .. },
                ResolvedRefType::ObjectArray {
                    dimensions: d2,
                    element: e2,
                },
            ) => match d1.cmp(d2) {
                Ordering::Less | Ordering::Equal => false,
                Ordering::Greater => is_array_type_assignable(&e2.name),
            },

            // Cursed (unsound) covariance of arrays
            (
                ResolvedRefType::ObjectArray {
                    dimensions: d1,
                    element: e1,
                },
                ResolvedRefType::ObjectArray {
                    dimensions: d2,
                    element: e2,
                },
            ) => match d1.cmp(d2) {
                Ordering::Less => false,
                Ordering::Equal => e1.is_assignable(e2),
                Ordering::Greater => is_array_type_assignable(&e2.name),
            },

            // Object-to-object assignability holds if there is a path through super type edges
            (ResolvedRefType::Object(cls1), ResolvedRefType::Object(cls2)) => cls1.is_assignable(cls2),

            _ => false,
        }
    }
}

/// Reference type whose classes have been resolved against a graph
///
/// This is [`RefType`](super::RefType) with names replaced by class data.
pub enum ResolvedRefType<'a, 'g> {
    Object(&'a ClassData<'g>),
    ObjectArray {
        dimensions: usize,
        element: &'a ClassData<'g>,
    },
    PrimitiveArray {
        dimensions: usize,
        element: super::BaseType,
    },
}

impl<'g> ClassGraph<'g> {
    /// Resolve a name-based reference type against the graph
    ///
    /// Fails with the unresolved name when a mentioned class was never added.
    pub fn resolve(&'g self, ty: &RefType) -> Result<ResolvedRefType<'g, 'g>, BinaryName> {
        match ty {
            RefType::Object(name) => {
                let cls = self.lookup_class(name).ok_or_else(|| name.clone())?;
                Ok(ResolvedRefType::Object(cls))
            }
            RefType::ObjectArray(arr) => {
                let cls = self
                    .lookup_class(&arr.element_type)
                    .ok_or_else(|| arr.element_type.clone())?;
                Ok(ResolvedRefType::ObjectArray {
                    dimensions: arr.dimensions(),
                    element: cls,
                })
            }
            RefType::PrimitiveArray(arr) => Ok(ResolvedRefType::PrimitiveArray {
                dimensions: arr.dimensions(),
                element: arr.element_type,
            }),
        }
    }
}

/// Check if arrays can be assigned to a super type
///
/// This bakes in knowledge of the small, finite set of super types arrays have.
fn is_array_type_assignable(super_type: &BinaryName) -> bool {
    super_type == &BinaryName::OBJECT
        || super_type == &BinaryName::CLONEABLE
        || super_type == &BinaryName::SERIALIZABLE
}

/// References to the standard library types baked into the graph
pub struct JavaClasses<'g> {
    pub object: &'g ClassData<'g>,
    pub cloneable: &'g ClassData<'g>,
    pub serializable: &'g ClassData<'g>,
    pub char_sequence: &'g ClassData<'g>,
    pub string: &'g ClassData<'g>,
    pub number: &'g ClassData<'g>,
    pub integer: &'g ClassData<'g>,
    pub long: &'g ClassData<'g>,
    pub float: &'g ClassData<'g>,
    pub double: &'g ClassData<'g>,
    pub throwable: &'g ClassData<'g>,
    pub exception: &'g ClassData<'g>,
    pub runtime_exception: &'g ClassData<'g>,
    pub arithmetic_exception: &'g ClassData<'g>,
}

impl<'g> JavaClasses<'g> {
    fn add_to_graph(class_graph: &'g ClassGraph<'g>) -> JavaClasses<'g> {
        let object = class_graph.add_class(ClassData {
            name: BinaryName::OBJECT,
            superclass: None,
            interfaces: FrozenVec::new(),
            is_interface: false,
        });
        let cloneable = class_graph.add_class(ClassData::new(BinaryName::CLONEABLE, object, true));
        let serializable =
            class_graph.add_class(ClassData::new(BinaryName::SERIALIZABLE, object, true));
        let char_sequence =
            class_graph.add_class(ClassData::new(BinaryName::CHARSEQUENCE, object, true));

        let string = class_graph.add_class(ClassData::new(BinaryName::STRING, object, false));
        string.interfaces.push(char_sequence);
        string.interfaces.push(serializable);

        let number = class_graph.add_class(ClassData::new(BinaryName::NUMBER, object, false));
        number.interfaces.push(serializable);
        let integer = class_graph.add_class(ClassData::new(BinaryName::INTEGER, number, false));
        let long = class_graph.add_class(ClassData::new(BinaryName::LONG, number, false));
        let float = class_graph.add_class(ClassData::new(BinaryName::FLOAT, number, false));
        let double = class_graph.add_class(ClassData::new(BinaryName::DOUBLE, number, false));

        let throwable = class_graph.add_class(ClassData::new(BinaryName::THROWABLE, object, false));
        let exception =
            class_graph.add_class(ClassData::new(BinaryName::EXCEPTION, throwable, false));
        let runtime_exception =
            class_graph.add_class(ClassData::new(BinaryName::RUNTIMEEXCEPTION, exception, false));
        let arithmetic_exception = class_graph.add_class(ClassData::new(
            BinaryName::ARITHMETICEXCEPTION,
            runtime_exception,
            false,
        ));

        JavaClasses {
            object,
            cloneable,
            serializable,
            char_sequence,
            string,
            number,
            integer,
            long,
            float,
            double,
            throwable,
            exception,
            runtime_exception,
            arithmetic_exception,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simple_classes() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let java = class_graph.insert_java_library_types();

        assert!(java.object.is_assignable(&java.object));
        assert!(java.string.is_assignable(&java.string));
        assert!(java.string.is_assignable(&java.object));
        assert!(!java.object.is_assignable(&java.string));
    }

    #[test]
    fn transitive_classes() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let java = class_graph.insert_java_library_types();

        assert!(java.number.is_assignable(&java.object));
        assert!(java.integer.is_assignable(&java.number));
        assert!(java.integer.is_assignable(&java.object));

        assert!(!java.object.is_assignable(&java.number));
        assert!(!java.number.is_assignable(&java.integer));
        assert!(!java.integer.is_assignable(&java.long));
    }

    #[test]
    fn simple_interfaces() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let java = class_graph.insert_java_library_types();

        assert!(java.string.is_assignable(&java.char_sequence));
        assert!(java.char_sequence.is_assignable(&java.object));
        assert!(!java.char_sequence.is_assignable(&java.string));
        assert!(!java.object.is_assignable(&java.char_sequence));
    }

    #[test]
    fn arrays() {
        use crate::jvm::FieldType;

        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let _java = class_graph.insert_java_library_types();

        let object = RefType::Object(BinaryName::OBJECT);
        let int_array = RefType::array(FieldType::int());
        let long_array = RefType::array(FieldType::long());
        let integer_array = RefType::array(FieldType::object(BinaryName::INTEGER));
        let number_array = RefType::array(FieldType::object(BinaryName::NUMBER));

        let assignable = |a: &RefType, b: &RefType| {
            let a = class_graph.resolve(a).ok().unwrap();
            let b = class_graph.resolve(b).ok().unwrap();
            a.is_assignable(&b)
        };

        assert!(assignable(&int_array, &object));
        assert!(!assignable(&object, &int_array));
        assert!(assignable(&int_array, &int_array));
        assert!(!assignable(&int_array, &long_array));

        assert!(assignable(&integer_array, &number_array));
        assert!(!assignable(&number_array, &integer_array));
        assert!(assignable(&number_array, &object));
        assert!(!assignable(&integer_array, &int_array));
    }

    #[test]
    fn missing_class() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        let _java = class_graph.insert_java_library_types();

        let missing = BinaryName::from_string(String::from("not/a/Class")).unwrap();
        let err = class_graph.resolve(&RefType::Object(missing.clone()));
        assert!(matches!(err, Err(name) if name == missing));
    }
}
