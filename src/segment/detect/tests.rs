use super::*;

#[test]
fn test_file_naming_conventions() {
    let test_files = [
        "test_example.py",
        "example_test.py",
        "tests.py",
        "example.test.js",
        "example.spec.js",
        "example.test.ts",
        "example.spec.ts",
        "example_test.rb",
        "example_spec.rb",
        "ExampleTest.java",
        "TestExample.java",
        "ExampleTests.cs",
        "ExampleTest.cs",
        "example_test.go",
        "test_example.rs",
        "ExampleTest.php",
        "TestExample.php",
        "ExampleTests.swift",
        "ExampleSpec.kt",
        "ExampleSpec.scala",
        "test_example.cpp",
        "example_test.cpp",
        "example.tests.py",
        "example._test.py",
        "example._tests.js",
        "example_spec.py",
        "example_spec_file.cpp",
        "XTest.java",
        "IOTest.java",
        "HTTPSpec.kt",
        "URLTests.swift",
    ];

    for name in test_files {
        assert!(is_test_file(name), "{name} should be a test file");
    }
}

#[test]
fn non_test_files() {
    let regular_files = [
        "regular_file.py",
        "example.py",
        "test.txt",
        "testdata.json",
        "testing_utils.py",
        "latest.rs",
        "Contest.java",
        "LATEST.txt",
        "Protest.java",
        "Makefile",
    ];

    for name in regular_files {
        assert!(!is_test_file(name), "{name} should not be a test file");
    }
}

#[test]
fn ignored_files() {
    let ignored = [
        "image.png",
        "audio.mp3",
        "video.mp4",
        "document.pdf",
        "archive.zip",
        "program.exe",
        "error.log",
        ".DS_Store",
        "LICENSE",
        "README.md",
        "__init__.py",
        "Photo.JPG",
        "Cargo.lock",
    ];

    for name in ignored {
        assert!(is_ignored_file(name), "{name} should be ignored");
    }

    for name in ["regular_file.py", "main.rs", "Makefile", ".gitignore"] {
        assert!(!is_ignored_file(name), "{name} should not be ignored");
    }
}

#[test]
fn language_detection() {
    let cases = [
        (".py", "python"),
        (".js", "javascript"),
        (".java", "java"),
        (".cpp", "cpp"),
        (".c", "c"),
        (".h", "cpp"),
        (".hpp", "cpp"),
        (".cs", "csharp"),
        (".rb", "ruby"),
        (".go", "go"),
        ("rs", "rust"),
        (".kt", "kotlin"),
        (".ts", "typescript"),
        (".sh", "shell"),
        (".cu", "cuda"),
        (".unknown", "Unknown"),
    ];

    for (extension, expected) in cases {
        assert_eq!(programming_language(extension), expected, "{extension}");
    }
}

#[test]
fn language_for_repository_paths() {
    assert_eq!(language_for_path("src/main.rs"), "rust");
    assert_eq!(language_for_path("scripts/build.SH"), "shell");
    assert_eq!(language_for_path("Makefile"), "Unknown");
}
